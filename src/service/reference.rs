//! 服务引用与注册句柄

use std::any::{Any, TypeId};
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, Weak};

use serde::Serialize;
use serde_json::Value;

use super::registry::RegistryInner;
use crate::event::{property_keys, Properties};
use crate::module::{ModuleId, ModuleIdentity};

/// 服务 ID，单调分配，不复用
pub type ServiceId = u64;

/// 服务契约类型，通常是 `dyn Trait`
#[derive(Clone, Copy)]
pub struct ContractType {
    type_id: TypeId,
    type_name: &'static str,
}

impl ContractType {
    /// 取类型 `T` 的契约
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
        }
    }

    /// 契约的 `TypeId`
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// 类型名，写入 `objectClass` 属性
    pub fn name(&self) -> &'static str {
        self.type_name
    }
}

impl PartialEq for ContractType {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

impl Eq for ContractType {}

impl fmt::Debug for ContractType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name)
    }
}

impl fmt::Display for ContractType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name)
    }
}

/// 注册表内部的服务条目
pub(crate) struct ServiceEntry {
    pub(crate) id: ServiceId,
    pub(crate) contract: ContractType,
    pub(crate) owner: ModuleIdentity,
    pub(crate) ranking: i64,
    pub(crate) properties: Properties,
    /// 实际类型为 `Arc<T>`
    pub(crate) instance: Arc<dyn Any + Send + Sync>,
}

impl ServiceEntry {
    pub(crate) fn downcast<T: ?Sized + Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.instance.downcast_ref::<Arc<T>>().cloned()
    }

    pub(crate) fn info(&self) -> ServiceInfo {
        ServiceInfo {
            id: self.id,
            contract: self.contract.name().to_string(),
            owner: self.owner.id,
            ranking: self.ranking,
            properties: self.properties.clone(),
        }
    }
}

/// 查找顺序：排序值高者优先，相同时先注册者优先
pub(crate) fn lookup_order(a: &ServiceEntry, b: &ServiceEntry) -> std::cmp::Ordering {
    b.ranking.cmp(&a.ranking).then(a.id.cmp(&b.id))
}

/// 从属性中读取 `service.ranking`，缺失或非整数时为 0
pub(crate) fn ranking_of(properties: &Properties) -> i64 {
    properties
        .get(property_keys::SERVICE_RANKING)
        .and_then(Value::as_i64)
        .unwrap_or(0)
}

/// 类型化的服务引用
pub struct ServiceReference<T: ?Sized> {
    entry: Arc<ServiceEntry>,
    _marker: PhantomData<fn() -> Arc<T>>,
}

impl<T: ?Sized + Send + Sync + 'static> ServiceReference<T> {
    pub(crate) fn new(entry: Arc<ServiceEntry>) -> Self {
        Self {
            entry,
            _marker: PhantomData,
        }
    }

    /// 服务 ID
    pub fn id(&self) -> ServiceId {
        self.entry.id
    }

    /// 提供者模块
    pub fn owner(&self) -> &ModuleIdentity {
        &self.entry.owner
    }

    /// 服务排序值
    pub fn ranking(&self) -> i64 {
        self.entry.ranking
    }

    /// 服务属性
    pub fn properties(&self) -> &Properties {
        &self.entry.properties
    }

    /// 读取单个属性
    pub fn property(&self, key: &str) -> Option<&Value> {
        self.entry.properties.get(key)
    }

    /// 服务契约
    pub fn contract(&self) -> ContractType {
        self.entry.contract
    }

    /// 服务实例
    pub fn service(&self) -> Option<Arc<T>> {
        self.entry.downcast::<T>()
    }
}

impl<T: ?Sized> Clone for ServiceReference<T> {
    fn clone(&self) -> Self {
        Self {
            entry: self.entry.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T: ?Sized> fmt::Debug for ServiceReference<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceReference")
            .field("id", &self.entry.id)
            .field("contract", &self.entry.contract)
            .field("owner", &self.entry.owner.id)
            .field("ranking", &self.entry.ranking)
            .finish()
    }
}

/// 服务快照，不含实例
#[derive(Debug, Clone, Serialize)]
pub struct ServiceInfo {
    /// 服务 ID
    pub id: ServiceId,
    /// 契约类型名
    pub contract: String,
    /// 注册该服务的模块
    pub owner: ModuleId,
    /// 服务排序值
    pub ranking: i64,
    /// 服务属性
    pub properties: Properties,
}

/// 注册句柄
///
/// 由 `register_service` 返回，可用于注销。注销是幂等的。
#[derive(Clone)]
pub struct ServiceRegistration {
    id: ServiceId,
    contract: ContractType,
    owner: ModuleId,
    registry: Weak<RegistryInner>,
}

impl ServiceRegistration {
    pub(crate) fn new(
        id: ServiceId,
        contract: ContractType,
        owner: ModuleId,
        registry: Weak<RegistryInner>,
    ) -> Self {
        Self {
            id,
            contract,
            owner,
            registry,
        }
    }

    /// 服务 ID
    pub fn id(&self) -> ServiceId {
        self.id
    }

    /// 服务契约
    pub fn contract(&self) -> ContractType {
        self.contract
    }

    /// 注册该服务的模块
    pub fn owner(&self) -> ModuleId {
        self.owner
    }

    /// 注销服务，已注销或注册表已销毁时返回 `false`
    pub fn unregister(&self) -> bool {
        match self.registry.upgrade() {
            Some(registry) => registry.unregister(self.id),
            None => false,
        }
    }
}

impl fmt::Debug for ServiceRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceRegistration")
            .field("id", &self.id)
            .field("contract", &self.contract)
            .field("owner", &self.owner)
            .finish()
    }
}
