//! 服务注册表
//!
//! 模块以契约类型（通常是 `dyn Trait`）发布服务，其它模块按契约查找或追踪。
//! 服务归注册它的模块所有，模块离开 `ACTIVE` 状态时自动注销。

pub mod reference;
pub mod registry;
pub mod tracker;

pub use reference::{ContractType, ServiceId, ServiceInfo, ServiceReference, ServiceRegistration};
pub use registry::ServiceRegistry;
pub use tracker::ServiceTracker;
