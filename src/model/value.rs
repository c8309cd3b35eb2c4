//! # Transactional Values
//!
//! ## Role
//! Every stateful model quantity (rates, frequencies, node heights, rate
//! category schedules) lives in a [`Value`] with a `current` and a `proposed`
//! instance. A move opens a cycle with a proposal; the driver closes it with
//! accept or revert.
//!
//! ## Dependency graph
//! Values carry explicit listener lists instead of callbacks. A listener is
//! either a likelihood component (marked dirty through a [`Notification`]) or a
//! derived value whose [`Derivation`] is re-evaluated and proposed in turn. A
//! derivation may only read values created before it, so the graph is acyclic
//! by construction.
//!
//! ## Failure
//! A derivation or a scalar bound may decline a proposal. Everything proposed
//! by that call is reverted silently before `ModificationImpossible` is
//! returned, leaving the store exactly as it was.

use crate::error::{McmcError, Result};
use crate::model::site_rates::SiteRates;
use crate::model::substitution::{F84Params, TransitionModel};

/// Index of a value in a [`ValueStore`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(pub usize);

impl ValueId {
    #[inline]
    pub fn as_usize(self) -> usize {
        self.0
    }
}

/// Index of a top-level likelihood component within a chain
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ComponentId(pub usize);

/// Entry in a value's registration list
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Listener {
    Component(ComponentId),
    Derived(ValueId),
}

/// A component must be told that `source` changed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Notification {
    pub component: ComponentId,
    pub source: ValueId,
}

/// Current/proposed pair with the active instance selected by a flag.
#[derive(Clone, Debug)]
pub struct Value<T> {
    current: T,
    proposed: T,
    proposed_active: bool,
    proposals: u64,
    rejections: u64,
    listeners: Vec<Listener>,
}

impl<T: Clone> Value<T> {
    pub fn new(initial: T) -> Self {
        Self {
            current: initial.clone(),
            proposed: initial,
            proposed_active: false,
            proposals: 0,
            rejections: 0,
            listeners: Vec::new(),
        }
    }

    /// The active instance
    #[inline]
    pub fn value(&self) -> &T {
        if self.proposed_active {
            &self.proposed
        } else {
            &self.current
        }
    }

    #[inline]
    pub fn current(&self) -> &T {
        &self.current
    }

    #[inline]
    pub fn is_proposed(&self) -> bool {
        self.proposed_active
    }

    pub fn propose(&mut self, value: T) {
        self.proposed = value;
        self.proposed_active = true;
        self.proposals += 1;
    }

    /// Make the proposed instance current. No-op outside a cycle.
    pub fn accept(&mut self) {
        if self.proposed_active {
            std::mem::swap(&mut self.current, &mut self.proposed);
            self.proposed_active = false;
        }
    }

    pub fn revert_silently(&mut self) {
        self.proposed_active = false;
        self.rejections += 1;
    }

    /// Register a listener. Returns false if it was already registered.
    pub fn add_listener(&mut self, listener: Listener) -> bool {
        if self.listeners.contains(&listener) {
            return false;
        }
        self.listeners.push(listener);
        true
    }

    pub fn listeners(&self) -> &[Listener] {
        &self.listeners
    }

    pub fn proposal_count(&self) -> u64 {
        self.proposals
    }

    pub fn rejection_count(&self) -> u64 {
        self.rejections
    }
}

/// Quantity recomputed from other values
#[derive(Clone, Debug, PartialEq)]
pub enum Derived {
    SiteRates(SiteRates),
    Substitution(TransitionModel),
}

/// Closed set of value kinds
#[derive(Clone, Debug, PartialEq)]
pub enum ParamValue {
    Scalar(f64),
    Vector(Vec<f64>),
    Compound(Derived),
}

impl ParamValue {
    pub fn kind(&self) -> &'static str {
        match self {
            ParamValue::Scalar(_) => "scalar",
            ParamValue::Vector(_) => "vector",
            ParamValue::Compound(Derived::SiteRates(_)) => "site-rates",
            ParamValue::Compound(Derived::Substitution(_)) => "substitution",
        }
    }

    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            ParamValue::Scalar(x) => Some(*x),
            _ => None,
        }
    }

    pub fn as_vector(&self) -> Option<&[f64]> {
        match self {
            ParamValue::Vector(v) => Some(v),
            _ => None,
        }
    }
}

/// How a compound value is recomputed from its sources
#[derive(Clone, Debug, PartialEq)]
pub enum Derivation {
    /// Discretized gamma rate categories from a shape scalar
    GammaRates { shape: ValueId, categories: usize },
    /// F84 generator from a kappa scalar and a frequency vector
    F84 { kappa: ValueId, frequencies: ValueId },
}

impl Derivation {
    pub fn sources(&self) -> Vec<ValueId> {
        match self {
            Derivation::GammaRates { shape, .. } => vec![*shape],
            Derivation::F84 { kappa, frequencies } => vec![*kappa, *frequencies],
        }
    }

    fn evaluate(&self, store: &ValueStore) -> Result<ParamValue> {
        match self {
            Derivation::GammaRates { shape, categories } => {
                let rates = SiteRates::gamma(store.scalar(*shape)?, *categories)?;
                Ok(ParamValue::Compound(Derived::SiteRates(rates)))
            }
            Derivation::F84 { kappa, frequencies } => {
                let params = F84Params::new(store.scalar(*kappa)?, store.vector(*frequencies)?)?;
                Ok(ParamValue::Compound(Derived::Substitution(TransitionModel::F84(
                    params,
                ))))
            }
        }
    }
}

/// Inclusive bounds on a scalar value
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Bounds {
    pub lower: f64,
    pub upper: f64,
}

impl Bounds {
    #[inline]
    pub fn contains(&self, x: f64) -> bool {
        x >= self.lower && x <= self.upper
    }
}

#[derive(Clone, Debug)]
struct Slot {
    name: String,
    value: Value<ParamValue>,
    bounds: Option<Bounds>,
    derivation: Option<Derivation>,
}

/// Arena of all values belonging to one chain.
#[derive(Clone, Debug, Default)]
pub struct ValueStore {
    slots: Vec<Slot>,
    /// Values proposed since the last accept/reject
    open: Vec<ValueId>,
}

impl ValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Add a bounded scalar
    pub fn add_scalar(
        &mut self,
        name: impl Into<String>,
        initial: f64,
        lower: f64,
        upper: f64,
    ) -> Result<ValueId> {
        let name = name.into();
        let bounds = Bounds { lower, upper };
        if !(lower <= upper) || !bounds.contains(initial) {
            return Err(McmcError::invalid_parameter(format!(
                "{} = {} is outside [{}, {}]",
                name, initial, lower, upper
            )));
        }
        Ok(self.push(name, ParamValue::Scalar(initial), Some(bounds), None))
    }

    pub fn add_vector(&mut self, name: impl Into<String>, initial: Vec<f64>) -> ValueId {
        self.push(name.into(), ParamValue::Vector(initial), None, None)
    }

    /// Add a compound value and register it on its sources
    pub fn add_derived(&mut self, name: impl Into<String>, derivation: Derivation) -> Result<ValueId> {
        let name = name.into();
        for source in derivation.sources() {
            self.slot(source)?;
        }
        let initial = derivation.evaluate(self).map_err(|e| {
            McmcError::invalid_parameter(format!("initial value of {}: {}", name, e))
        })?;
        let sources = derivation.sources();
        let id = self.push(name, initial, None, Some(derivation));
        for source in sources {
            self.slots[source.0].value.add_listener(Listener::Derived(id));
        }
        Ok(id)
    }

    fn push(
        &mut self,
        name: String,
        initial: ParamValue,
        bounds: Option<Bounds>,
        derivation: Option<Derivation>,
    ) -> ValueId {
        let id = ValueId(self.slots.len());
        self.slots.push(Slot {
            name,
            value: Value::new(initial),
            bounds,
            derivation,
        });
        id
    }

    fn slot(&self, id: ValueId) -> Result<&Slot> {
        self.slots
            .get(id.0)
            .ok_or_else(|| McmcError::invalid_parameter(format!("unknown value id {}", id.0)))
    }

    pub fn add_listener(&mut self, id: ValueId, listener: Listener) -> Result<bool> {
        self.slot(id)?;
        Ok(self.slots[id.0].value.add_listener(listener))
    }

    pub fn name(&self, id: ValueId) -> Result<&str> {
        Ok(&self.slot(id)?.name)
    }

    pub fn bounds(&self, id: ValueId) -> Result<Option<Bounds>> {
        Ok(self.slot(id)?.bounds)
    }

    /// Active value
    pub fn get(&self, id: ValueId) -> Result<&ParamValue> {
        Ok(self.slot(id)?.value.value())
    }

    pub fn current(&self, id: ValueId) -> Result<&ParamValue> {
        Ok(self.slot(id)?.value.current())
    }

    pub fn is_proposed(&self, id: ValueId) -> bool {
        self.slots
            .get(id.0)
            .map(|s| s.value.is_proposed())
            .unwrap_or(false)
    }

    pub fn has_open_cycle(&self) -> bool {
        !self.open.is_empty()
    }

    pub fn proposal_count(&self, id: ValueId) -> Result<u64> {
        Ok(self.slot(id)?.value.proposal_count())
    }

    pub fn rejection_count(&self, id: ValueId) -> Result<u64> {
        Ok(self.slot(id)?.value.rejection_count())
    }

    pub fn scalar(&self, id: ValueId) -> Result<f64> {
        let slot = self.slot(id)?;
        slot.value
            .value()
            .as_scalar()
            .ok_or_else(|| McmcError::invalid_parameter(format!("{} is not a scalar", slot.name)))
    }

    pub fn vector(&self, id: ValueId) -> Result<&[f64]> {
        let slot = self.slot(id)?;
        slot.value
            .value()
            .as_vector()
            .ok_or_else(|| McmcError::invalid_parameter(format!("{} is not a vector", slot.name)))
    }

    pub fn site_rates(&self, id: ValueId) -> Result<&SiteRates> {
        let slot = self.slot(id)?;
        match slot.value.value() {
            ParamValue::Compound(Derived::SiteRates(r)) => Ok(r),
            other => Err(McmcError::invalid_parameter(format!(
                "{} holds {}, not site rates",
                slot.name,
                other.kind()
            ))),
        }
    }

    pub fn substitution(&self, id: ValueId) -> Result<&TransitionModel> {
        let slot = self.slot(id)?;
        match slot.value.value() {
            ParamValue::Compound(Derived::Substitution(m)) => Ok(m),
            other => Err(McmcError::invalid_parameter(format!(
                "{} holds {}, not a substitution model",
                slot.name,
                other.kind()
            ))),
        }
    }

    /// Propose a new value and notify listeners.
    ///
    /// Returns the component notifications produced by the whole cascade.
    pub fn propose(&mut self, id: ValueId, value: ParamValue) -> Result<Vec<Notification>> {
        let slot = self.slot(id)?;
        if slot.derivation.is_some() {
            return Err(McmcError::invalid_parameter(format!(
                "{} is derived and cannot be proposed directly",
                slot.name
            )));
        }
        if std::mem::discriminant(slot.value.current()) != std::mem::discriminant(&value) {
            return Err(McmcError::invalid_parameter(format!(
                "{} holds {}, proposal is {}",
                slot.name,
                slot.value.current().kind(),
                value.kind()
            )));
        }

        let mut touched = Vec::new();
        let mut notifications = Vec::new();
        match self.propose_cascade(id, value, &mut touched, &mut notifications) {
            Ok(()) => {
                for id in touched {
                    if !self.open.contains(&id) {
                        self.open.push(id);
                    }
                }
                Ok(notifications)
            }
            Err(e) => {
                for id in touched.iter().rev() {
                    self.slots[id.0].value.revert_silently();
                }
                Err(e)
            }
        }
    }

    fn propose_cascade(
        &mut self,
        id: ValueId,
        value: ParamValue,
        touched: &mut Vec<ValueId>,
        notifications: &mut Vec<Notification>,
    ) -> Result<()> {
        if let (Some(bounds), ParamValue::Scalar(x)) = (self.slots[id.0].bounds, &value) {
            if !bounds.contains(*x) {
                return Err(McmcError::impossible(format!(
                    "{} = {} is outside [{}, {}]",
                    self.slots[id.0].name, x, bounds.lower, bounds.upper
                )));
            }
        }
        self.slots[id.0].value.propose(value);
        touched.push(id);

        let listeners = self.slots[id.0].value.listeners().to_vec();
        for listener in listeners {
            match listener {
                Listener::Component(component) => notifications.push(Notification {
                    component,
                    source: id,
                }),
                Listener::Derived(derived) => {
                    let next = match &self.slots[derived.0].derivation {
                        Some(derivation) => derivation.evaluate(self)?,
                        None => {
                            return Err(McmcError::invalid_parameter(format!(
                                "{} listens to {} without a derivation",
                                self.slots[derived.0].name, self.slots[id.0].name
                            )))
                        }
                    };
                    self.propose_cascade(derived, next, touched, notifications)?;
                }
            }
        }
        Ok(())
    }

    /// Revert one value and everything derived from it, notifying listeners
    pub fn revert(&mut self, id: ValueId) -> Result<Vec<Notification>> {
        self.slot(id)?;
        let mut notifications = Vec::new();
        self.revert_cascade(id, &mut notifications);
        let slots = &self.slots;
        self.open.retain(|open| slots[open.0].value.is_proposed());
        Ok(notifications)
    }

    fn revert_cascade(&mut self, id: ValueId, notifications: &mut Vec<Notification>) {
        self.slots[id.0].value.revert_silently();
        let listeners = self.slots[id.0].value.listeners().to_vec();
        for listener in listeners {
            match listener {
                Listener::Component(component) => notifications.push(Notification {
                    component,
                    source: id,
                }),
                Listener::Derived(derived) => {
                    if self.slots[derived.0].value.is_proposed() {
                        self.revert_cascade(derived, notifications);
                    }
                }
            }
        }
    }

    pub fn revert_silently(&mut self, id: ValueId) -> Result<()> {
        self.slot(id)?;
        self.slots[id.0].value.revert_silently();
        self.open.retain(|open| *open != id);
        Ok(())
    }

    pub fn accept(&mut self, id: ValueId) -> Result<()> {
        self.slot(id)?;
        self.slots[id.0].value.accept();
        self.open.retain(|open| *open != id);
        Ok(())
    }

    /// Accept every value proposed in the open cycle
    pub fn accept_open(&mut self) {
        for id in std::mem::take(&mut self.open) {
            self.slots[id.0].value.accept();
        }
    }

    /// Silently revert every value proposed in the open cycle
    pub fn reject_open(&mut self) {
        for id in std::mem::take(&mut self.open) {
            if self.slots[id.0].value.is_proposed() {
                self.slots[id.0].value.revert_silently();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accept_reject_symmetry() {
        let mut v = Value::new(1.0);
        v.propose(2.5);
        assert!(v.is_proposed());
        assert_eq!(*v.value(), 2.5);
        v.accept();
        assert_eq!(*v.current(), 2.5);
        assert_eq!(*v.value(), 2.5);
        assert!(!v.is_proposed());

        v.propose(7.0);
        v.revert_silently();
        assert_eq!(*v.current(), 2.5);
        assert_eq!(*v.value(), 2.5);
        assert!(!v.is_proposed());
        assert_eq!(v.proposal_count(), 2);
        assert_eq!(v.rejection_count(), 1);
    }

    #[test]
    fn test_accept_outside_cycle_is_noop() {
        let mut v = Value::new(vec![1.0, 2.0]);
        v.accept();
        assert_eq!(v.current(), &vec![1.0, 2.0]);
    }

    #[test]
    fn test_listeners_deduplicated() {
        let mut v = Value::new(0.0);
        assert!(v.add_listener(Listener::Component(ComponentId(0))));
        assert!(!v.add_listener(Listener::Component(ComponentId(0))));
        assert_eq!(v.listeners().len(), 1);
    }

    #[test]
    fn test_store_bounds_reject() {
        let mut store = ValueStore::new();
        let k = store.add_scalar("kappa", 2.0, 0.0, 100.0).unwrap();
        let err = store.propose(k, ParamValue::Scalar(-1.0)).unwrap_err();
        assert!(err.is_modification_impossible());
        assert!(!store.is_proposed(k));
        assert!(!store.has_open_cycle());
        assert_eq!(store.scalar(k).unwrap(), 2.0);
    }

    #[test]
    fn test_store_notifies_components() {
        let mut store = ValueStore::new();
        let a = store.add_scalar("a", 1.0, 0.0, 10.0).unwrap();
        store.add_listener(a, Listener::Component(ComponentId(3))).unwrap();
        let notes = store.propose(a, ParamValue::Scalar(2.0)).unwrap();
        assert_eq!(
            notes,
            vec![Notification {
                component: ComponentId(3),
                source: a
            }]
        );
        store.accept_open();
        assert_eq!(store.scalar(a).unwrap(), 2.0);
        assert!(!store.has_open_cycle());
    }

    #[test]
    fn test_derived_value_follows_source() {
        let mut store = ValueStore::new();
        let shape = store.add_scalar("shape", 1.0, 0.01, 50.0).unwrap();
        let rates = store
            .add_derived("rates", Derivation::GammaRates { shape, categories: 4 })
            .unwrap();
        store.add_listener(rates, Listener::Component(ComponentId(0))).unwrap();
        let before = store.site_rates(rates).unwrap().clone();

        let notes = store.propose(shape, ParamValue::Scalar(0.2)).unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].source, rates);
        assert!(store.is_proposed(rates));
        assert_ne!(store.site_rates(rates).unwrap(), &before);

        store.reject_open();
        assert_eq!(store.site_rates(rates).unwrap(), &before);
        assert!(!store.is_proposed(shape));
    }

    #[test]
    fn test_derived_rejection_reverts_whole_cascade() {
        let mut store = ValueStore::new();
        let kappa = store.add_scalar("kappa", 2.0, 0.0, 1000.0).unwrap();
        let freqs = store.add_vector("freqs", vec![0.25; 4]);
        let f84 = store
            .add_derived("f84", Derivation::F84 { kappa, frequencies: freqs })
            .unwrap();

        // kappa = 0 with uniform frequencies violates the F84 constraint
        store.propose(kappa, ParamValue::Scalar(0.0)).unwrap_err();
        assert!(!store.is_proposed(kappa));
        assert!(!store.is_proposed(f84));
        assert_eq!(store.scalar(kappa).unwrap(), 2.0);
        assert_eq!(store.rejection_count(kappa).unwrap(), 1);
    }

    #[test]
    fn test_notifying_revert() {
        let mut store = ValueStore::new();
        let a = store.add_scalar("a", 1.0, 0.0, 10.0).unwrap();
        store.add_listener(a, Listener::Component(ComponentId(1))).unwrap();
        store.propose(a, ParamValue::Scalar(4.0)).unwrap();
        let notes = store.revert(a).unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(store.scalar(a).unwrap(), 1.0);
        assert!(!store.has_open_cycle());
    }

    #[test]
    fn test_kind_mismatch_is_invalid() {
        let mut store = ValueStore::new();
        let a = store.add_scalar("a", 1.0, 0.0, 10.0).unwrap();
        let err = store.propose(a, ParamValue::Vector(vec![1.0])).unwrap_err();
        assert!(matches!(err, McmcError::InvalidParameter { .. }));
    }
}
