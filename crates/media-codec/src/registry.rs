//! Engine lookup and per-kind instance limits.
//!
//! Both registries are plain values owned by the embedding application and
//! passed to [`CodecSession::create`](crate::session::CodecSession::create).

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use media_codec_types::CodecKind;

use crate::engine::EngineFactory;
use crate::error::{CodecError, Result};

/// Engine factories keyed by the MIME type they handle.
#[derive(Default)]
pub struct EngineRegistry {
    factories: Vec<Box<dyn EngineFactory>>,
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, factory: Box<dyn EngineFactory>) {
        let cap = factory.capability();
        tracing::debug!(engine = %cap.name, mime = %cap.mime, hardware = cap.hardware, "engine registered");
        self.factories.push(factory);
    }

    /// Best factory for `mime`: hardware first, then registration order.
    pub fn resolve(&self, mime: &str) -> Result<&dyn EngineFactory> {
        let mut matching = self
            .factories
            .iter()
            .filter(|f| f.capability().mime.eq_ignore_ascii_case(mime));
        let first = matching
            .next()
            .ok_or_else(|| CodecError::unsupported(format!("no engine for {mime}")))?;
        let best = if first.capability().hardware {
            first
        } else {
            matching
                .find(|f| f.capability().hardware)
                .unwrap_or(first)
        };
        Ok(best.as_ref())
    }

    /// Registered engine names, in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.factories
            .iter()
            .map(|f| f.capability().name.as_str())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

#[derive(Debug, Default)]
struct Counts {
    limits: HashMap<CodecKind, usize>,
    active: HashMap<CodecKind, usize>,
}

/// Caps the number of live sessions per codec kind.
#[derive(Clone, Debug, Default)]
pub struct InstanceRegistry {
    inner: Arc<Mutex<Counts>>,
}

impl InstanceRegistry {
    /// Registry with the given per-kind limits. Kinds without a limit are unbounded.
    pub fn with_limits(limits: impl IntoIterator<Item = (CodecKind, usize)>) -> Self {
        let registry = Self::default();
        registry.lock().limits.extend(limits);
        registry
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Counts> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reserve one instance of `kind`. The reservation ends when the lease drops.
    pub fn acquire(&self, kind: CodecKind) -> Result<InstanceLease> {
        let mut counts = self.lock();
        let active = counts.active.get(&kind).copied().unwrap_or(0);
        if let Some(&limit) = counts.limits.get(&kind) {
            if active >= limit {
                tracing::warn!(?kind, active, limit, "codec instance limit reached");
                return Err(CodecError::no_memory(format!(
                    "{kind:?} instance limit {limit} reached"
                )));
            }
        }
        counts.active.insert(kind, active + 1);
        Ok(InstanceLease {
            registry: self.clone(),
            kind,
        })
    }

    /// Live instances of `kind`.
    pub fn active(&self, kind: CodecKind) -> usize {
        self.lock().active.get(&kind).copied().unwrap_or(0)
    }
}

/// One reserved instance; released on drop.
#[derive(Debug)]
pub struct InstanceLease {
    registry: InstanceRegistry,
    kind: CodecKind,
}

impl InstanceLease {
    pub fn kind(&self) -> CodecKind {
        self.kind
    }
}

impl Drop for InstanceLease {
    fn drop(&mut self) {
        let mut counts = self.registry.lock();
        if let Some(active) = counts.active.get_mut(&self.kind) {
            *active = active.saturating_sub(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CodecConfig;
    use crate::engine::{CodecEngine, EngineCapability, EngineStatus, FrameInfo, SendDescriptor};

    struct NullEngine;

    impl CodecEngine for NullEngine {
        fn open(&mut self, _config: &CodecConfig) -> Result<()> {
            Ok(())
        }
        fn flush(&mut self) -> Result<()> {
            Ok(())
        }
        fn close(&mut self) {}
        fn send(&mut self, _input: &SendDescriptor<'_>) -> EngineStatus {
            EngineStatus::Ok
        }
        fn receive(&mut self, _info: &mut FrameInfo) -> EngineStatus {
            EngineStatus::TryAgain
        }
        fn copy_frame(&mut self, _dst: &mut [u8]) -> Result<usize> {
            Ok(0)
        }
    }

    struct NullFactory(EngineCapability);

    impl EngineFactory for NullFactory {
        fn capability(&self) -> &EngineCapability {
            &self.0
        }
        fn create(&self) -> Result<Box<dyn CodecEngine>> {
            Ok(Box::new(NullEngine))
        }
    }

    fn factory(name: &str, mime: &str, hardware: bool) -> Box<dyn EngineFactory> {
        Box::new(NullFactory(EngineCapability {
            name: name.to_string(),
            mime: mime.to_string(),
            kind: CodecKind::Video,
            hardware,
            max_width: 4096,
            max_height: 4096,
        }))
    }

    #[test]
    fn resolve_prefers_hardware() {
        let mut reg = EngineRegistry::new();
        reg.register(factory("soft.avc", "video/avc", false));
        reg.register(factory("hw.avc", "video/avc", true));
        reg.register(factory("soft.hevc", "video/hevc", false));
        assert_eq!(reg.resolve("video/avc").unwrap().capability().name, "hw.avc");
        assert_eq!(reg.resolve("VIDEO/HEVC").unwrap().capability().name, "soft.hevc");
        assert!(matches!(reg.resolve("audio/aac"), Err(CodecError::Unsupported(_))));
    }

    #[test]
    fn instance_limit_is_enforced_and_released_on_drop() {
        let reg = InstanceRegistry::with_limits([(CodecKind::Video, 1)]);
        let lease = reg.acquire(CodecKind::Video).unwrap();
        assert!(matches!(reg.acquire(CodecKind::Video), Err(CodecError::NoMemory(_))));
        assert!(reg.acquire(CodecKind::Audio).is_ok());
        drop(lease);
        assert_eq!(reg.active(CodecKind::Video), 0);
        assert!(reg.acquire(CodecKind::Video).is_ok());
    }
}
