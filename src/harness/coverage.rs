use std::collections::BTreeMap;

use crate::layout::LinkedObject;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Access {
    pub read: bool,
    pub write: bool,
    pub execute: bool,
}

impl Access {
    #[must_use]
    pub fn any(self) -> bool {
        self.read || self.write || self.execute
    }

    fn merge(&mut self, other: Self) {
        self.read |= other.read;
        self.write |= other.write;
        self.execute |= other.execute;
    }
}

/// Byte-granular record of what a run touched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Coverage {
    bytes: BTreeMap<u32, Access>,
}

impl Coverage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log_read(&mut self, address: u32, size: u32) {
        self.mark(address, size, |a| a.read = true);
    }

    pub fn log_write(&mut self, address: u32, size: u32) {
        self.mark(address, size, |a| a.write = true);
    }

    pub fn log_execute(&mut self, address: u32, size: u32) {
        self.mark(address, size, |a| a.execute = true);
    }

    fn mark(&mut self, address: u32, size: u32, set: impl Fn(&mut Access)) {
        for i in 0..size {
            set(self.bytes.entry(address.wrapping_add(i)).or_default());
        }
    }

    #[must_use]
    pub fn get(&self, address: u32) -> Access {
        self.bytes.get(&address).copied().unwrap_or_default()
    }

    /// Combines runs of the same object.
    pub fn merge(&mut self, other: &Self) {
        for (&address, &access) in &other.bytes {
            self.bytes.entry(address).or_default().merge(access);
        }
    }

    /// Per-byte access flags over every linked section byte.
    #[must_use]
    pub fn report(&self, linked: &LinkedObject) -> BTreeMap<u32, Access> {
        linked
            .section_ranges()
            .flat_map(|(_, start, end)| start..end)
            .map(|address| (address, self.get(address)))
            .collect()
    }

    /// Fraction of linked bytes touched in any way. Zero for an empty image.
    #[must_use]
    pub fn ratio(&self, linked: &LinkedObject) -> f64 {
        let report = self.report(linked);
        if report.is_empty() {
            return 0.0;
        }
        let touched = report.values().filter(|a| a.any()).count();
        touched as f64 / report.len() as f64
    }
}
