// L2 协调层模块入口

pub mod system_coordinator;

pub use system_coordinator::SystemCoordinator;
