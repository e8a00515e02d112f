// L1 原子层模块入口

pub mod system_proxy;
