//! Ordered, user-mutable processor list.
//!
//! The list lives behind an `ArcSwap` and every mutation publishes a fresh
//! copy, so the worker's per-frame `snapshot()` never takes a lock and never
//! sees a half-applied reorder.

use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{RegistryError, StageError};
use crate::processors::{Processor, ProcessorKind, StageContext};
use crate::ProcessorSetting;

/// Value view of one registered processor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessorDescriptor {
    pub kind: ProcessorKind,
    pub name: &'static str,
    pub save_directory_name: &'static str,
    pub position: usize,
    pub enabled: bool,
    pub dummy_preview: bool,
}

/// A processor bound to the descriptor it had when the snapshot was taken.
#[derive(Clone)]
pub struct ActiveStage {
    pub descriptor: ProcessorDescriptor,
    pub processor: Arc<dyn Processor>,
}

impl ActiveStage {
    pub fn new(processor: Arc<dyn Processor>) -> Self {
        let descriptor = ProcessorDescriptor {
            kind: processor.kind(),
            name: processor.name(),
            save_directory_name: processor.save_directory_name(),
            position: 0,
            enabled: true,
            dummy_preview: false,
        };
        Self {
            descriptor,
            processor,
        }
    }

    pub fn with_dummy_preview(mut self, dummy_preview: bool) -> Self {
        self.descriptor.dummy_preview = dummy_preview;
        self
    }
}

impl std::fmt::Debug for ActiveStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ActiveStage").field(&self.descriptor).finish()
    }
}

/// Ordered enabled stages, taken once per frame.
pub type Snapshot = Vec<ActiveStage>;

#[derive(Clone)]
struct Entry {
    descriptor: ProcessorDescriptor,
    processor: Arc<dyn Processor>,
}

pub struct ProcessorRegistry {
    entries: ArcSwap<Vec<Entry>>,
}

impl ProcessorRegistry {
    /// Build every stage from the static table, in configured order. Kinds the
    /// configuration does not mention are appended disabled.
    pub fn from_settings(settings: &[ProcessorSetting], context: &StageContext) -> Self {
        let mut processors = Vec::new();
        let mut flags = Vec::new();
        for setting in settings {
            let kind = match ProcessorKind::from_key(&setting.key) {
                Ok(kind) => kind,
                Err(e) => {
                    warn!("skipping processor setting: {e}");
                    continue;
                }
            };
            if flags.iter().any(|(k, _, _)| *k == kind) {
                warn!(%kind, "processor listed twice, keeping the first entry");
                continue;
            }
            processors.push(kind.build());
            flags.push((kind, setting.enabled, setting.dummy_preview));
        }
        for kind in ProcessorKind::ALL {
            if !flags.iter().any(|(k, _, _)| *k == kind) {
                processors.push(kind.build());
                flags.push((kind, false, false));
            }
        }

        let registry = Self::with_setup(processors, context);
        for (kind, enabled, dummy) in flags {
            // Registered above, so these cannot fail
            let _ = registry.set_enabled(kind, enabled);
            let _ = registry.set_dummy_preview(kind, dummy);
        }
        registry
    }

    /// Run `setup` on each processor and register them all enabled, in order.
    /// A stage that is not ready is still registered; it falls back to its
    /// pass-through behaviour.
    pub fn with_setup(processors: Vec<Box<dyn Processor>>, context: &StageContext) -> Self {
        let processors = processors
            .into_iter()
            .map(|mut p| {
                match p.setup(context) {
                    Ok(()) => info!(stage = p.name(), "stage ready"),
                    Err(e @ StageError::NotReady { .. }) => warn!("{e}"),
                    Err(e) => warn!(stage = p.name(), "stage setup failed: {e}"),
                }
                p
            })
            .collect();
        Self::from_processors(processors)
    }

    /// Register already set up processors, all enabled. A kind that appears
    /// twice keeps its first instance.
    pub fn from_processors(processors: Vec<Box<dyn Processor>>) -> Self {
        let mut entries: Vec<Entry> = Vec::with_capacity(processors.len());
        for processor in processors {
            let kind = processor.kind();
            if entries.iter().any(|e| e.descriptor.kind == kind) {
                warn!(%kind, "duplicate processor ignored");
                continue;
            }
            entries.push(Entry {
                descriptor: ProcessorDescriptor {
                    kind,
                    name: processor.name(),
                    save_directory_name: processor.save_directory_name(),
                    position: entries.len(),
                    enabled: true,
                    dummy_preview: false,
                },
                processor: Arc::from(processor),
            });
        }
        Self {
            entries: ArcSwap::from_pointee(entries),
        }
    }

    /// Ordered enabled stages. Lock-free; later mutations do not affect it.
    pub fn snapshot(&self) -> Snapshot {
        self.entries
            .load()
            .iter()
            .filter(|e| e.descriptor.enabled)
            .map(|e| ActiveStage {
                descriptor: e.descriptor.clone(),
                processor: e.processor.clone(),
            })
            .collect()
    }

    /// Every registered processor, enabled or not, in order.
    pub fn descriptors(&self) -> Vec<ProcessorDescriptor> {
        self.entries
            .load()
            .iter()
            .map(|e| e.descriptor.clone())
            .collect()
    }

    pub fn descriptor(&self, kind: ProcessorKind) -> Option<ProcessorDescriptor> {
        self.entries
            .load()
            .iter()
            .find(|e| e.descriptor.kind == kind)
            .map(|e| e.descriptor.clone())
    }

    /// Disabling a processor also clears its dummy-preview flag.
    pub fn set_enabled(&self, kind: ProcessorKind, enabled: bool) -> Result<(), RegistryError> {
        self.update(|entries| {
            let entry = find_mut(entries, kind)?;
            entry.descriptor.enabled = enabled;
            if !enabled {
                entry.descriptor.dummy_preview = false;
            }
            Ok(())
        })?;
        info!(%kind, enabled, "processor toggled");
        Ok(())
    }

    /// Ignored for a disabled processor.
    pub fn set_dummy_preview(&self, kind: ProcessorKind, on: bool) -> Result<(), RegistryError> {
        self.update(|entries| {
            let entry = find_mut(entries, kind)?;
            if entry.descriptor.enabled {
                entry.descriptor.dummy_preview = on;
            } else if on {
                debug!(%kind, "dummy preview ignored for disabled processor");
            }
            Ok(())
        })
    }

    /// Swap with the previous entry. No-op at the top.
    pub fn move_up(&self, kind: ProcessorKind) -> Result<(), RegistryError> {
        self.update(|entries| {
            let i = index_of(entries, kind)?;
            if i > 0 {
                entries.swap(i, i - 1);
            }
            Ok(())
        })
    }

    /// Swap with the next entry. No-op at the bottom.
    pub fn move_down(&self, kind: ProcessorKind) -> Result<(), RegistryError> {
        self.update(|entries| {
            let i = index_of(entries, kind)?;
            if i + 1 < entries.len() {
                entries.swap(i, i + 1);
            }
            Ok(())
        })
    }

    /// Move to `position`, clamped to the end of the list.
    pub fn move_to(&self, kind: ProcessorKind, position: usize) -> Result<(), RegistryError> {
        self.update(|entries| {
            let i = index_of(entries, kind)?;
            let entry = entries.remove(i);
            let position = position.min(entries.len());
            entries.insert(position, entry);
            Ok(())
        })
    }

    /// Put `order` first, in that order; everything else keeps its relative
    /// order after it. Repeated kinds count once.
    pub fn set_order(&self, order: &[ProcessorKind]) -> Result<(), RegistryError> {
        self.update(|entries| {
            let mut rest = std::mem::take(entries);
            for &kind in order {
                if let Some(i) = rest.iter().position(|e| e.descriptor.kind == kind) {
                    entries.push(rest.remove(i));
                } else if !entries.iter().any(|e| e.descriptor.kind == kind) {
                    return Err(RegistryError::NotRegistered(kind.key()));
                }
            }
            entries.extend(rest);
            Ok(())
        })?;
        info!(order = ?order, "processor order changed");
        Ok(())
    }

    /// Apply `change` to a private copy and publish it. Nothing is published
    /// when `change` fails.
    fn update<F>(&self, mut change: F) -> Result<(), RegistryError>
    where
        F: FnMut(&mut Vec<Entry>) -> Result<(), RegistryError>,
    {
        let mut outcome = Ok(());
        self.entries.rcu(|current| {
            let mut next = Vec::clone(current);
            outcome = change(&mut next);
            if outcome.is_err() {
                return Arc::clone(current);
            }
            for (position, entry) in next.iter_mut().enumerate() {
                entry.descriptor.position = position;
            }
            Arc::new(next)
        });
        outcome
    }
}

fn index_of(entries: &[Entry], kind: ProcessorKind) -> Result<usize, RegistryError> {
    entries
        .iter()
        .position(|e| e.descriptor.kind == kind)
        .ok_or(RegistryError::NotRegistered(kind.key()))
}

fn find_mut(entries: &mut [Entry], kind: ProcessorKind) -> Result<&mut Entry, RegistryError> {
    entries
        .iter_mut()
        .find(|e| e.descriptor.kind == kind)
        .ok_or(RegistryError::NotRegistered(kind.key()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ProcessorKind::*;

    fn registry() -> ProcessorRegistry {
        ProcessorRegistry::from_processors(vec![
            Raw.build(),
            Face.build(),
            Pose.build(),
            Tongue.build(),
        ])
    }

    fn kinds(registry: &ProcessorRegistry) -> Vec<ProcessorKind> {
        registry.descriptors().iter().map(|d| d.kind).collect()
    }

    #[test]
    fn settings_order_is_kept_and_unknown_keys_skipped() {
        let settings = vec![
            ProcessorSetting::new("tongue", true),
            ProcessorSetting::new("hand", true),
            ProcessorSetting::new("raw", false),
        ];
        let registry = ProcessorRegistry::from_settings(&settings, &StageContext::default());
        let d = registry.descriptors();
        assert_eq!(d.len(), ProcessorKind::ALL.len());
        assert_eq!((d[0].kind, d[0].enabled), (Tongue, true));
        assert_eq!((d[1].kind, d[1].enabled), (Raw, false));
        assert!(d[2..].iter().all(|d| !d.enabled));
        assert_eq!(
            registry
                .snapshot()
                .iter()
                .map(|s| s.descriptor.kind)
                .collect::<Vec<_>>(),
            vec![Tongue]
        );
    }

    #[test]
    fn snapshot_is_not_torn_by_later_reorders() {
        let registry = registry();
        let before = registry.snapshot();
        registry.move_to(Tongue, 0).unwrap();
        assert_eq!(before[0].descriptor.kind, Raw);
        assert_eq!(registry.snapshot()[0].descriptor.kind, Tongue);
    }

    #[test]
    fn moves_and_positions() {
        let registry = registry();
        registry.move_up(Raw).unwrap();
        assert_eq!(kinds(&registry), vec![Raw, Face, Pose, Tongue]);
        registry.move_down(Raw).unwrap();
        assert_eq!(kinds(&registry), vec![Face, Raw, Pose, Tongue]);
        registry.move_to(Face, 99).unwrap();
        assert_eq!(kinds(&registry), vec![Raw, Pose, Tongue, Face]);
        let positions: Vec<_> = registry.descriptors().iter().map(|d| d.position).collect();
        assert_eq!(positions, vec![0, 1, 2, 3]);
    }

    #[test]
    fn set_order_puts_listed_first() {
        let registry = registry();
        registry.set_order(&[Tongue, Face, Tongue]).unwrap();
        assert_eq!(kinds(&registry), vec![Tongue, Face, Raw, Pose]);
    }

    #[test]
    fn failed_update_publishes_nothing() {
        let registry = registry();
        assert_eq!(
            registry.set_order(&[Pose, Wink]),
            Err(RegistryError::NotRegistered("wink"))
        );
        assert_eq!(kinds(&registry), vec![Raw, Face, Pose, Tongue]);
    }

    #[test]
    fn disabling_clears_dummy_preview() {
        let registry = registry();
        registry.set_dummy_preview(Face, true).unwrap();
        assert!(registry.descriptor(Face).unwrap().dummy_preview);
        registry.set_enabled(Face, false).unwrap();
        assert!(!registry.descriptor(Face).unwrap().dummy_preview);

        registry.set_dummy_preview(Face, true).unwrap();
        assert!(!registry.descriptor(Face).unwrap().dummy_preview);
        assert_eq!(registry.snapshot().len(), 3);
    }
}
