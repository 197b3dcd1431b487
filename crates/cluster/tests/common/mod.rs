#![allow(dead_code)]

pub mod test_cluster;
pub mod test_node;
