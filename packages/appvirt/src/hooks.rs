//! The interception seam.
//!
//! Patching the real API entry points is platform work that lives outside
//! this crate. A platform layer implements [`HookInstaller`]; the guest
//! context hands it one [`HookHandler`] per [`InterceptedApi`], and the
//! patched entry point forwards each call as a [`HookCall`].

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use appvirt_core::{CreationDisposition, RegistryData};
use appvirt_provider::KeyHandle;

use crate::error::{AppError, Result};

/// Every API the guest intercepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum InterceptedApi {
    CreateFile,
    CreateDirectory,
    DeleteFile,
    MoveFile,
    LoadLibrary,
    RegOpenKey,
    RegCreateKey,
    RegQueryValue,
    RegSetValue,
    RegDeleteValue,
    RegDeleteKey,
    RegCloseKey,
}

impl InterceptedApi {
    pub const ALL: [InterceptedApi; 12] = [
        InterceptedApi::CreateFile,
        InterceptedApi::CreateDirectory,
        InterceptedApi::DeleteFile,
        InterceptedApi::MoveFile,
        InterceptedApi::LoadLibrary,
        InterceptedApi::RegOpenKey,
        InterceptedApi::RegCreateKey,
        InterceptedApi::RegQueryValue,
        InterceptedApi::RegSetValue,
        InterceptedApi::RegDeleteValue,
        InterceptedApi::RegDeleteKey,
        InterceptedApi::RegCloseKey,
    ];

    pub fn name(self) -> &'static str {
        match self {
            InterceptedApi::CreateFile => "CreateFile",
            InterceptedApi::CreateDirectory => "CreateDirectory",
            InterceptedApi::DeleteFile => "DeleteFile",
            InterceptedApi::MoveFile => "MoveFile",
            InterceptedApi::LoadLibrary => "LoadLibrary",
            InterceptedApi::RegOpenKey => "RegOpenKey",
            InterceptedApi::RegCreateKey => "RegCreateKey",
            InterceptedApi::RegQueryValue => "RegQueryValue",
            InterceptedApi::RegSetValue => "RegSetValue",
            InterceptedApi::RegDeleteValue => "RegDeleteValue",
            InterceptedApi::RegDeleteKey => "RegDeleteKey",
            InterceptedApi::RegCloseKey => "RegCloseKey",
        }
    }
}

impl fmt::Display for InterceptedApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Arguments of one intercepted call.
#[derive(Debug, Clone, PartialEq)]
pub enum HookCall {
    CreateFile {
        path: String,
        disposition: CreationDisposition,
    },
    CreateDirectory { path: String },
    DeleteFile { path: String },
    MoveFile { from: String, to: String },
    LoadLibrary { path: String },
    RegOpenKey { path: String },
    RegCreateKey { path: String },
    RegQueryValue { key: KeyHandle, name: String },
    RegSetValue {
        key: KeyHandle,
        name: String,
        data: RegistryData,
    },
    RegDeleteValue { key: KeyHandle, name: String },
    RegDeleteKey { key: KeyHandle },
    RegCloseKey { key: KeyHandle },
}

impl HookCall {
    pub fn api(&self) -> InterceptedApi {
        match self {
            HookCall::CreateFile { .. } => InterceptedApi::CreateFile,
            HookCall::CreateDirectory { .. } => InterceptedApi::CreateDirectory,
            HookCall::DeleteFile { .. } => InterceptedApi::DeleteFile,
            HookCall::MoveFile { .. } => InterceptedApi::MoveFile,
            HookCall::LoadLibrary { .. } => InterceptedApi::LoadLibrary,
            HookCall::RegOpenKey { .. } => InterceptedApi::RegOpenKey,
            HookCall::RegCreateKey { .. } => InterceptedApi::RegCreateKey,
            HookCall::RegQueryValue { .. } => InterceptedApi::RegQueryValue,
            HookCall::RegSetValue { .. } => InterceptedApi::RegSetValue,
            HookCall::RegDeleteValue { .. } => InterceptedApi::RegDeleteValue,
            HookCall::RegDeleteKey { .. } => InterceptedApi::RegDeleteKey,
            HookCall::RegCloseKey { .. } => InterceptedApi::RegCloseKey,
        }
    }
}

/// What the patched entry point should do next.
#[derive(Debug, Clone, PartialEq)]
pub enum HookReply {
    /// Call the real API on this path instead of the one passed in.
    Path(String),
    /// Call the real API with the original arguments.
    PassThrough,
    /// The call was handled; the real API must not run.
    Handled,
    /// The resource does not exist as far as the guest can see; fail the
    /// call without running the real API.
    NotFound,
    /// Run the real move between these paths instead.
    Move { from: String, to: String },
    Key(KeyHandle),
    Value(RegistryData),
    /// Whether something was deleted.
    Removed(bool),
}

pub type HookHandler = Arc<dyn Fn(HookCall) -> Result<HookReply> + Send + Sync>;

/// Registers handlers with whatever patches the real entry points.
pub trait HookInstaller {
    fn install(&mut self, api: InterceptedApi, handler: HookHandler) -> Result<()>;
}

/// An installer that keeps handlers in a table and dispatches calls to
/// them directly. Useful wherever the calls are already in hand.
#[derive(Default)]
pub struct HookTable {
    handlers: BTreeMap<InterceptedApi, HookHandler>,
}

impl HookTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_installed(&self, api: InterceptedApi) -> bool {
        self.handlers.contains_key(&api)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Run the handler installed for the call's API.
    pub fn dispatch(&self, call: HookCall) -> Result<HookReply> {
        let api = call.api();
        let handler = self.handlers.get(&api).ok_or(AppError::NoHook { api })?;
        handler(call)
    }
}

impl HookInstaller for HookTable {
    fn install(&mut self, api: InterceptedApi, handler: HookHandler) -> Result<()> {
        if self.handlers.insert(api, handler).is_some() {
            return Err(AppError::HookInstall {
                api,
                message: "already installed".to_string(),
            });
        }
        Ok(())
    }
}
