mod arena;
mod node;
mod raw_bplus_map;

pub(crate) use arena::Handle;
pub(crate) use node::Node;
pub(crate) use raw_bplus_map::RawBPlusTreeMap;
