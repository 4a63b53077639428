//! Named port values handed to systems by the executor.

use std::collections::BTreeMap;

use nalgebra::DVector;

use crate::system::SystemError;

/// Port values keyed by port name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Vars {
    values: BTreeMap<String, DVector<f64>>,
}

impl Vars {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Result<&DVector<f64>, SystemError> {
        self.values
            .get(name)
            .ok_or_else(|| SystemError::MissingPort(name.to_string()))
    }

    pub fn get_mut(&mut self, name: &str) -> Result<&mut DVector<f64>, SystemError> {
        self.values
            .get_mut(name)
            .ok_or_else(|| SystemError::MissingPort(name.to_string()))
    }

    /// First entry of a scalar port.
    pub fn scalar(&self, name: &str) -> Result<f64, SystemError> {
        let value = self.get(name)?;
        value.iter().next().copied().ok_or(SystemError::Length {
            port: name.to_string(),
            expected: 1,
            found: 0,
        })
    }

    pub fn set(&mut self, name: impl Into<String>, value: DVector<f64>) {
        self.values.insert(name.into(), value);
    }

    pub fn set_scalar(&mut self, name: impl Into<String>, value: f64) {
        self.set(name, DVector::from_element(1, value));
    }

    /// Overwrite an existing port, keeping its declared length.
    pub fn assign(&mut self, name: &str, value: &DVector<f64>) -> Result<(), SystemError> {
        let slot = self.get_mut(name)?;
        if slot.len() != value.len() {
            return Err(SystemError::Length {
                port: name.to_string(),
                expected: slot.len(),
                found: value.len(),
            });
        }
        slot.copy_from(value);
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &DVector<f64>)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl FromIterator<(String, DVector<f64>)> for Vars {
    fn from_iter<I: IntoIterator<Item = (String, DVector<f64>)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}
