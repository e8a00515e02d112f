// 服务层模块入口

pub mod path_service;
pub mod settings;

pub use path_service::PathService;
pub use settings::Settings;
