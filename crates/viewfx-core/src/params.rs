//! Parameter store: the host-owned values an effect samples per render.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{ViewFxError, ViewFxResult};
use crate::geometry::PointD;

/// A parameter value at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ParamValue {
    Double(f64),
    Double2D(PointD),
    Bool(bool),
    /// Index into the option list of a choice parameter.
    Choice(usize),
}

impl ParamValue {
    fn kind(&self) -> &'static str {
        match self {
            ParamValue::Double(_) => "double",
            ParamValue::Double2D(_) => "double2d",
            ParamValue::Bool(_) => "bool",
            ParamValue::Choice(_) => "choice",
        }
    }

    fn same_kind(&self, other: &ParamValue) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }

    fn lerp(&self, other: &ParamValue, t: f64) -> ParamValue {
        match (self, other) {
            (ParamValue::Double(a), ParamValue::Double(b)) => ParamValue::Double(a + (b - a) * t),
            (ParamValue::Double2D(a), ParamValue::Double2D(b)) => ParamValue::Double2D(PointD::new(
                a.x + (b.x - a.x) * t,
                a.y + (b.y - a.y) * t,
            )),
            // Discrete values hold until the next key.
            _ => *self,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Keyframe {
    pub time: f64,
    pub value: ParamValue,
}

/// Keys of an animated parameter, sorted by time. Never empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Keyframe>", into = "Vec<Keyframe>")]
pub struct Keyframes {
    first: Keyframe,
    rest: Vec<Keyframe>,
}

impl Keyframes {
    /// Sort `keys` by time. Fails when there are none.
    pub fn new(mut keys: Vec<Keyframe>) -> ViewFxResult<Self> {
        keys.sort_by(|a, b| a.time.total_cmp(&b.time));
        let mut keys = keys.into_iter();
        let first = keys
            .next()
            .ok_or_else(|| ViewFxError::InvalidArgument("a keyframed curve needs at least one key".to_string()))?;
        Ok(Self {
            first,
            rest: keys.collect(),
        })
    }

    pub fn first(&self) -> &Keyframe {
        &self.first
    }

    pub fn iter(&self) -> impl Iterator<Item = &Keyframe> {
        std::iter::once(&self.first).chain(self.rest.iter())
    }

    pub fn len(&self) -> usize {
        1 + self.rest.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// Add or replace the key at `key.time`.
    pub fn insert(&mut self, key: Keyframe) {
        let mut keys: Vec<Keyframe> = self.iter().copied().filter(|k| k.time != key.time).collect();
        keys.push(key);
        keys.sort_by(|a, b| a.time.total_cmp(&b.time));
        let mut keys = keys.into_iter();
        if let Some(first) = keys.next() {
            self.first = first;
            self.rest = keys.collect();
        }
    }
}

impl TryFrom<Vec<Keyframe>> for Keyframes {
    type Error = ViewFxError;

    fn try_from(keys: Vec<Keyframe>) -> ViewFxResult<Self> {
        Self::new(keys)
    }
}

impl From<Keyframes> for Vec<Keyframe> {
    fn from(keys: Keyframes) -> Self {
        let mut all = Vec::with_capacity(keys.len());
        all.push(keys.first);
        all.extend(keys.rest);
        all
    }
}

/// Value of a parameter over time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Curve {
    Constant(ParamValue),
    Keyframed(Keyframes),
}

impl Curve {
    /// Sample the curve. Numeric values interpolate linearly between keys,
    /// discrete ones step; times outside the keys clamp to the ends.
    pub fn value_at(&self, time: f64) -> ParamValue {
        let keys = match self {
            Curve::Constant(v) => return *v,
            Curve::Keyframed(keys) => keys,
        };
        let mut previous = *keys.first();
        if time <= previous.time {
            return previous.value;
        }
        for next in keys.iter().skip(1) {
            if time < next.time {
                let span = next.time - previous.time;
                let t = if span > 0.0 { (time - previous.time) / span } else { 0.0 };
                return previous.value.lerp(&next.value, t);
            }
            previous = *next;
        }
        previous.value
    }

    fn template(&self) -> ParamValue {
        match self {
            Curve::Constant(v) => *v,
            Curve::Keyframed(keys) => keys.first().value,
        }
    }
}

/// Read/write access to an effect's parameters.
pub trait ParamStore: Send + Sync {
    fn value_at(&self, name: &str, time: f64) -> ViewFxResult<ParamValue>;

    /// Replace the parameter with a constant value of the same kind.
    fn set_value(&self, name: &str, value: ParamValue) -> ViewFxResult<()>;

    fn exists(&self, name: &str) -> bool;

    fn set_enabled(&self, name: &str, enabled: bool) -> ViewFxResult<()>;

    fn is_enabled(&self, name: &str) -> bool;

    fn double_at(&self, name: &str, time: f64) -> ViewFxResult<f64> {
        match self.value_at(name, time)? {
            ParamValue::Double(v) => Ok(v),
            other => Err(kind_error(name, "double", &other)),
        }
    }

    fn double2d_at(&self, name: &str, time: f64) -> ViewFxResult<PointD> {
        match self.value_at(name, time)? {
            ParamValue::Double2D(v) => Ok(v),
            other => Err(kind_error(name, "double2d", &other)),
        }
    }

    fn bool_at(&self, name: &str, time: f64) -> ViewFxResult<bool> {
        match self.value_at(name, time)? {
            ParamValue::Bool(v) => Ok(v),
            other => Err(kind_error(name, "bool", &other)),
        }
    }

    fn choice_at(&self, name: &str, time: f64) -> ViewFxResult<usize> {
        match self.value_at(name, time)? {
            ParamValue::Choice(v) => Ok(v),
            other => Err(kind_error(name, "choice", &other)),
        }
    }
}

fn kind_error(name: &str, wanted: &str, found: &ParamValue) -> ViewFxError {
    ViewFxError::param(name, format!("expected a {} value, found {}", wanted, found.kind()))
}

#[derive(Debug, Clone)]
struct ParamEntry {
    curve: Curve,
    enabled: bool,
    button: bool,
}

/// In-memory parameter store.
#[derive(Debug, Default)]
pub struct ParamSet {
    entries: RwLock<HashMap<String, ParamEntry>>,
}

impl ParamSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Define (or redefine) a parameter with a constant default.
    pub fn define(&self, name: &str, default: ParamValue) {
        self.entries.write().insert(
            name.to_string(),
            ParamEntry {
                curve: Curve::Constant(default),
                enabled: true,
                button: false,
            },
        );
    }

    /// Define a push button. Buttons carry no value; pressing one is reported
    /// through `ImageEffect::changed_param`.
    pub fn define_button(&self, name: &str) {
        self.entries.write().insert(
            name.to_string(),
            ParamEntry {
                curve: Curve::Constant(ParamValue::Bool(false)),
                enabled: true,
                button: true,
            },
        );
    }

    /// Add or replace a key at `time`, turning a constant into a curve.
    pub fn set_keyframe(&self, name: &str, time: f64, value: ParamValue) -> ViewFxResult<()> {
        let mut entries = self.entries.write();
        let entry = entries
            .get_mut(name)
            .ok_or_else(|| ViewFxError::param(name, "no such parameter"))?;
        if !entry.curve.template().same_kind(&value) {
            return Err(kind_error(name, entry.curve.template().kind(), &value));
        }
        let key = Keyframe { time, value };
        if let Curve::Keyframed(keys) = &mut entry.curve {
            keys.insert(key);
        } else {
            entry.curve = Curve::Keyframed(Keyframes::new(vec![key])?);
        }
        Ok(())
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.read().keys().cloned().collect();
        names.sort();
        names
    }
}

impl ParamStore for ParamSet {
    fn value_at(&self, name: &str, time: f64) -> ViewFxResult<ParamValue> {
        let entries = self.entries.read();
        let entry = entries
            .get(name)
            .ok_or_else(|| ViewFxError::param(name, "no such parameter"))?;
        if entry.button {
            return Err(ViewFxError::param(name, "push buttons have no value"));
        }
        Ok(entry.curve.value_at(time))
    }

    fn set_value(&self, name: &str, value: ParamValue) -> ViewFxResult<()> {
        let mut entries = self.entries.write();
        let entry = entries
            .get_mut(name)
            .ok_or_else(|| ViewFxError::param(name, "no such parameter"))?;
        if !entry.curve.template().same_kind(&value) {
            return Err(kind_error(name, entry.curve.template().kind(), &value));
        }
        entry.curve = Curve::Constant(value);
        Ok(())
    }

    fn exists(&self, name: &str) -> bool {
        self.entries.read().contains_key(name)
    }

    fn set_enabled(&self, name: &str, enabled: bool) -> ViewFxResult<()> {
        let mut entries = self.entries.write();
        let entry = entries
            .get_mut(name)
            .ok_or_else(|| ViewFxError::param(name, "no such parameter"))?;
        entry.enabled = enabled;
        Ok(())
    }

    fn is_enabled(&self, name: &str) -> bool {
        self.entries.read().get(name).is_some_and(|e| e.enabled)
    }
}
