//! Named signal sets wired from a PV prefix and a component table.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{
    error::{DeviceError, DeviceResult},
    signal::{Access, ControlLayer, Signal, Value},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Kind {
    Hinted,
    Normal,
    Config,
    Omitted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComponentSpec {
    pub attr: &'static str,
    pub suffix: &'static str,
    pub access: Access,
    pub kind: Kind,
}

impl ComponentSpec {
    pub const fn ro(attr: &'static str, suffix: &'static str, kind: Kind) -> Self {
        Self {
            attr,
            suffix,
            access: Access::ReadOnly,
            kind,
        }
    }

    pub const fn rw(attr: &'static str, suffix: &'static str, kind: Kind) -> Self {
        Self {
            attr,
            suffix,
            access: Access::ReadWrite,
            kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reading {
    pub attr: String,
    pub pvname: String,
    pub value: Option<Value>,
}

#[derive(Debug)]
struct Entry {
    attr: String,
    kind: Kind,
    signal: Arc<dyn Signal>,
}

#[derive(Debug)]
pub struct SignalGroup {
    name: String,
    prefix: String,
    entries: Vec<Entry>,
}

impl SignalGroup {
    pub fn new(name: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prefix: prefix.into(),
            entries: Vec::new(),
        }
    }

    /// Group with one signal per component, PV name `{prefix}{suffix}`.
    pub fn build(
        layer: &dyn ControlLayer,
        name: &str,
        prefix: &str,
        specs: &[ComponentSpec],
    ) -> Self {
        specs
            .iter()
            .fold(Self::new(name, prefix), |group, spec| group.with(layer, spec))
    }

    pub fn with(self, layer: &dyn ControlLayer, spec: &ComponentSpec) -> Self {
        let pvname = format!("{}{}", self.prefix, spec.suffix);
        self.with_pv(layer, spec.attr, &pvname, spec.access, spec.kind)
    }

    /// Adds a signal with a fully formatted PV name.
    pub fn with_pv(
        mut self,
        layer: &dyn ControlLayer,
        attr: &str,
        pvname: &str,
        access: Access,
        kind: Kind,
    ) -> Self {
        self.entries.push(Entry {
            attr: attr.to_string(),
            kind,
            signal: layer.connect(pvname, access),
        });
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn attrs(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.attr.as_str()).collect()
    }

    pub fn signal(&self, attr: &str) -> DeviceResult<Arc<dyn Signal>> {
        self.entries
            .iter()
            .find(|e| e.attr == attr)
            .map(|e| e.signal.clone())
            .ok_or_else(|| DeviceError::UnknownComponent {
                device: self.name.clone(),
                attr: attr.to_string(),
            })
    }

    pub fn get(&self, attr: &str) -> DeviceResult<Value> {
        self.signal(attr)?.get()
    }

    pub fn get_f64(&self, attr: &str) -> DeviceResult<f64> {
        self.signal(attr)?.get_f64()
    }

    pub fn connected(&self) -> bool {
        self.entries.iter().all(|e| e.signal.connected())
    }

    /// Hinted and normal components.
    pub fn read(&self) -> Vec<Reading> {
        self.read_kinds(&[Kind::Hinted, Kind::Normal])
    }

    pub fn read_configuration(&self) -> Vec<Reading> {
        self.read_kinds(&[Kind::Config])
    }

    pub fn read_kinds(&self, kinds: &[Kind]) -> Vec<Reading> {
        self.entries
            .iter()
            .filter(|e| kinds.contains(&e.kind))
            .map(|e| Reading {
                attr: format!("{}_{}", self.name, e.attr),
                pvname: e.signal.pvname().to_string(),
                value: e.signal.get().ok(),
            })
            .collect()
    }
}
