//! On-disk stores: the skip-list relationship store, its record codecs,
//! and the block id generator.

pub mod block;
pub mod idgen;
pub mod paged;
pub mod record;
pub mod skiplist;
