//! 模块元数据定义
//!
//! 模块描述符由外部引导程序提供，运行时据此创建 [`Module`] 记录。

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use semver::Version;
use serde::{Deserialize, Serialize};

use super::activator::{Activator, ActivatorHandle};
use crate::utils::{CoreError, Result};

/// 模块 ID，单调分配，不复用
pub type ModuleId = u64;

/// 运行时自身的系统模块 ID
pub const SYSTEM_MODULE_ID: ModuleId = 0;

/// 模块身份：ID、符号名与版本
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModuleIdentity {
    /// 模块 ID
    pub id: ModuleId,
    /// 符号名
    pub symbolic_name: String,
    /// 版本
    pub version: Version,
}

impl ModuleIdentity {
    /// 创建模块身份
    pub fn new(id: ModuleId, symbolic_name: impl Into<String>, version: Version) -> Self {
        Self {
            id,
            symbolic_name: symbolic_name.into(),
            version,
        }
    }

    /// 是否为系统模块
    pub fn is_system(&self) -> bool {
        self.id == SYSTEM_MODULE_ID
    }
}

impl fmt::Display for ModuleIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{} [{}]", self.symbolic_name, self.version, self.id)
    }
}

/// 模块状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleState {
    /// 已安装，尚未启动
    Installed,
    /// 正在启动
    Starting,
    /// 运行中
    Active,
    /// 正在停止
    Stopping,
    /// 已停止
    Stopped,
    /// 启动失败
    Failed,
    /// 已卸载
    Uninstalled,
}

impl Default for ModuleState {
    fn default() -> Self {
        ModuleState::Installed
    }
}

impl ModuleState {
    /// 是否可以启动
    pub fn can_start(&self) -> bool {
        matches!(
            self,
            ModuleState::Installed | ModuleState::Stopped | ModuleState::Failed
        )
    }

    /// 是否可以停止
    pub fn can_stop(&self) -> bool {
        matches!(self, ModuleState::Active)
    }

    /// 是否允许注册服务
    pub fn accepts_services(&self) -> bool {
        matches!(self, ModuleState::Active | ModuleState::Starting)
    }
}

impl fmt::Display for ModuleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModuleState::Installed => "INSTALLED",
            ModuleState::Starting => "STARTING",
            ModuleState::Active => "ACTIVE",
            ModuleState::Stopping => "STOPPING",
            ModuleState::Stopped => "STOPPED",
            ModuleState::Failed => "FAILED",
            ModuleState::Uninstalled => "UNINSTALLED",
        };
        f.write_str(name)
    }
}

/// 不透明的代码加载器引用
pub type LoaderRef = Arc<dyn Any + Send + Sync>;

/// 模块描述符
///
/// 由制品扫描、清单解析等外部组件构造，交给运行时安装。
#[derive(Clone)]
pub struct ModuleDescriptor {
    /// 符号名
    pub symbolic_name: String,
    /// 版本
    pub version: Version,
    /// 激活器，可以没有
    pub activator: Option<Arc<dyn Activator>>,
    /// 资源列表
    pub resources: Vec<String>,
    /// 描述符头部
    pub headers: HashMap<String, String>,
    /// 加载器句柄
    pub loader: Option<LoaderRef>,
}

impl ModuleDescriptor {
    /// 使用 Builder 模式构建描述符
    pub fn builder(symbolic_name: impl Into<String>) -> ModuleDescriptorBuilder {
        ModuleDescriptorBuilder::new(symbolic_name)
    }
}

impl fmt::Debug for ModuleDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleDescriptor")
            .field("symbolic_name", &self.symbolic_name)
            .field("version", &self.version)
            .field("has_activator", &self.activator.is_some())
            .field("resources", &self.resources)
            .field("headers", &self.headers)
            .field("has_loader", &self.loader.is_some())
            .finish()
    }
}

/// 模块描述符构建器
pub struct ModuleDescriptorBuilder {
    symbolic_name: String,
    version: String,
    activator: Option<Arc<dyn Activator>>,
    resources: Vec<String>,
    headers: HashMap<String, String>,
    loader: Option<LoaderRef>,
}

impl ModuleDescriptorBuilder {
    /// 以符号名创建构建器
    pub fn new(symbolic_name: impl Into<String>) -> Self {
        Self {
            symbolic_name: symbolic_name.into(),
            version: "0.0.0".to_string(),
            activator: None,
            resources: Vec::new(),
            headers: HashMap::new(),
            loader: None,
        }
    }

    /// 设置版本号（semver 格式，在 `build` 时解析）
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// 设置激活器
    pub fn activator(mut self, activator: Arc<dyn Activator>) -> Self {
        self.activator = Some(activator);
        self
    }

    /// 声明资源
    pub fn resource(mut self, resource: impl Into<String>) -> Self {
        self.resources.push(resource.into());
        self
    }

    /// 添加清单头
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// 设置加载器句柄
    pub fn loader(mut self, loader: LoaderRef) -> Self {
        self.loader = Some(loader);
        self
    }

    /// 校验版本号并构建描述符
    pub fn build(self) -> Result<ModuleDescriptor> {
        let symbolic_name = self.symbolic_name.trim().to_string();
        if symbolic_name.is_empty() {
            return Err(CoreError::InvalidConfigValue {
                key: "symbolic_name".to_string(),
                reason: "模块符号名不能为空".to_string(),
            });
        }

        Ok(ModuleDescriptor {
            symbolic_name,
            version: Version::parse(self.version.trim())?,
            activator: self.activator,
            resources: self.resources,
            headers: self.headers,
            loader: self.loader,
        })
    }
}

/// 可变的生命周期状态
#[derive(Debug, Clone)]
struct ModuleStatus {
    state: ModuleState,
    started_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

/// 已安装的模块
///
/// 身份信息不可变；状态只由生命周期管理器修改。
pub struct Module {
    identity: ModuleIdentity,
    activator: Option<ActivatorHandle>,
    resources: Vec<String>,
    headers: HashMap<String, String>,
    loader: Option<LoaderRef>,
    installed_at: DateTime<Utc>,
    status: RwLock<ModuleStatus>,
    /// 串行化同一模块的状态转换
    pub(crate) transition: tokio::sync::Mutex<()>,
}

impl Module {
    pub(crate) fn from_descriptor(id: ModuleId, descriptor: ModuleDescriptor) -> Self {
        Self {
            identity: ModuleIdentity::new(id, descriptor.symbolic_name, descriptor.version),
            activator: descriptor.activator.map(ActivatorHandle::new),
            resources: descriptor.resources,
            headers: descriptor.headers,
            loader: descriptor.loader,
            installed_at: Utc::now(),
            status: RwLock::new(ModuleStatus {
                state: ModuleState::Installed,
                started_at: None,
                last_error: None,
            }),
            transition: tokio::sync::Mutex::new(()),
        }
    }

    /// 系统模块：无激活器，创建即处于运行状态
    pub(crate) fn system(symbolic_name: &str) -> Self {
        let version = Version::parse(crate::VERSION).unwrap_or_else(|_| Version::new(0, 0, 0));
        let module = Self::from_descriptor(
            SYSTEM_MODULE_ID,
            ModuleDescriptor {
                symbolic_name: symbolic_name.to_string(),
                version,
                activator: None,
                resources: Vec::new(),
                headers: HashMap::new(),
                loader: None,
            },
        );
        module.mark_active();
        module
    }

    /// 模块身份
    pub fn identity(&self) -> &ModuleIdentity {
        &self.identity
    }

    /// 模块 ID
    pub fn id(&self) -> ModuleId {
        self.identity.id
    }

    /// 符号名
    pub fn symbolic_name(&self) -> &str {
        &self.identity.symbolic_name
    }

    /// 版本
    pub fn version(&self) -> &Version {
        &self.identity.version
    }

    /// 当前状态
    pub fn state(&self) -> ModuleState {
        self.status.read().unwrap_or_else(PoisonError::into_inner).state
    }

    /// 激活器句柄，启动后仍保留以便查看
    pub fn activator(&self) -> Option<&ActivatorHandle> {
        self.activator.as_ref()
    }

    /// 资源列表
    pub fn resources(&self) -> &[String] {
        &self.resources
    }

    /// 描述符头部
    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    /// 读取单个头部
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    /// 加载器句柄
    pub fn loader(&self) -> Option<&LoaderRef> {
        self.loader.as_ref()
    }

    /// 安装时间
    pub fn installed_at(&self) -> DateTime<Utc> {
        self.installed_at
    }

    /// 最近一次启动成功的时间
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.status.read().unwrap_or_else(PoisonError::into_inner).started_at
    }

    /// 最近一次启动或停止失败的原因
    pub fn last_error(&self) -> Option<String> {
        self.status
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .last_error
            .clone()
    }

    /// 状态快照
    pub fn info(&self) -> ModuleInfo {
        let status = self
            .status
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        ModuleInfo {
            identity: self.identity.clone(),
            state: status.state,
            has_activator: self.activator.is_some(),
            resources: self.resources.clone(),
            headers: self.headers.clone(),
            installed_at: self.installed_at,
            started_at: status.started_at,
            last_error: status.last_error,
        }
    }

    fn update(&self, f: impl FnOnce(&mut ModuleStatus)) {
        f(&mut self.status.write().unwrap_or_else(PoisonError::into_inner));
    }

    pub(crate) fn set_state(&self, state: ModuleState) {
        self.update(|status| status.state = state);
    }

    pub(crate) fn mark_starting(&self) {
        self.update(|status| {
            status.state = ModuleState::Starting;
            status.last_error = None;
        });
    }

    pub(crate) fn mark_active(&self) {
        self.update(|status| {
            status.state = ModuleState::Active;
            status.started_at = Some(Utc::now());
        });
    }

    pub(crate) fn mark_failed(&self, cause: String) {
        self.update(|status| {
            status.state = ModuleState::Failed;
            status.started_at = None;
            status.last_error = Some(cause);
        });
    }

    pub(crate) fn mark_stopped(&self, cause: Option<String>) {
        self.update(|status| {
            status.state = ModuleState::Stopped;
            status.started_at = None;
            if cause.is_some() {
                status.last_error = cause;
            }
        });
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("identity", &self.identity)
            .field("state", &self.state())
            .field("has_activator", &self.activator.is_some())
            .finish()
    }
}

/// 模块运行时信息快照
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleInfo {
    /// 模块身份
    pub identity: ModuleIdentity,

    /// 当前状态
    pub state: ModuleState,

    /// 是否有激活器
    pub has_activator: bool,

    /// 资源列表
    #[serde(default)]
    pub resources: Vec<String>,

    /// 描述符头部
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// 安装时间
    pub installed_at: DateTime<Utc>,

    /// 最近一次启动成功的时间
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    /// 最近一次失败的原因
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl ModuleInfo {
    /// 模块 ID
    pub fn id(&self) -> ModuleId {
        self.identity.id
    }

    /// 符号名
    pub fn symbolic_name(&self) -> &str {
        &self.identity.symbolic_name
    }

    /// 是否处于运行状态
    pub fn is_active(&self) -> bool {
        self.state == ModuleState::Active
    }
}
