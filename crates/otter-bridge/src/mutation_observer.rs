//! Mutation observer registration and record fan-out.
//!
//! A DOM mutation builds a [`MutationObserverInterestGroup`] for its target.
//! The group holds every observer interested in that mutation with its merged
//! options, and hands each one either the original record or a shared copy
//! without the old value.

use std::cell::RefCell;
use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::rc::Rc;

use indexmap::IndexMap;
use otter_bridge_gc::{GcRef, Trace, Tracer};

use crate::value::Value;

/// Kind of DOM mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationType {
    /// Children added or removed
    ChildList,
    /// Attribute changed
    Attributes,
    /// Text content changed
    CharacterData,
}

impl MutationType {
    /// Option bit an observer needs to receive this kind
    pub fn option(self) -> MutationObserverOptions {
        match self {
            Self::ChildList => MutationObserverOptions::CHILD_LIST,
            Self::Attributes => MutationObserverOptions::ATTRIBUTES,
            Self::CharacterData => MutationObserverOptions::CHARACTER_DATA,
        }
    }

    /// Record `type` string
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ChildList => "childList",
            Self::Attributes => "attributes",
            Self::CharacterData => "characterData",
        }
    }
}

/// Observer delivery options (`MutationObserverInit` as bits)
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MutationObserverOptions(u8);

impl MutationObserverOptions {
    /// `childList`
    pub const CHILD_LIST: Self = Self(1 << 0);
    /// `attributes`
    pub const ATTRIBUTES: Self = Self(1 << 1);
    /// `characterData`
    pub const CHARACTER_DATA: Self = Self(1 << 2);
    /// `subtree`
    pub const SUBTREE: Self = Self(1 << 3);
    /// `attributeOldValue`
    pub const ATTRIBUTE_OLD_VALUE: Self = Self(1 << 4);
    /// `characterDataOldValue`
    pub const CHARACTER_DATA_OLD_VALUE: Self = Self(1 << 5);
    /// `attributeFilter` was given
    pub const ATTRIBUTE_FILTER: Self = Self(1 << 6);

    /// No options
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Raw bits
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Check if no bit is set
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// All bits of `other` are set
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Any bit of `other` is set
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }
}

impl BitOr for MutationObserverOptions {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for MutationObserverOptions {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for MutationObserverOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(MutationObserverOptions, &str); 7] = [
            (MutationObserverOptions::CHILD_LIST, "CHILD_LIST"),
            (MutationObserverOptions::ATTRIBUTES, "ATTRIBUTES"),
            (MutationObserverOptions::CHARACTER_DATA, "CHARACTER_DATA"),
            (MutationObserverOptions::SUBTREE, "SUBTREE"),
            (MutationObserverOptions::ATTRIBUTE_OLD_VALUE, "ATTRIBUTE_OLD_VALUE"),
            (
                MutationObserverOptions::CHARACTER_DATA_OLD_VALUE,
                "CHARACTER_DATA_OLD_VALUE",
            ),
            (MutationObserverOptions::ATTRIBUTE_FILTER, "ATTRIBUTE_FILTER"),
        ];
        let set: Vec<&str> = NAMES
            .iter()
            .filter(|(bit, _)| self.contains(*bit))
            .map(|(_, name)| *name)
            .collect();
        write!(f, "MutationObserverOptions({})", set.join(" | "))
    }
}

/// One observed mutation
#[derive(Debug, Clone)]
pub struct MutationRecord {
    mutation_type: MutationType,
    target: GcRef,
    attribute_name: Option<Rc<str>>,
    old_value: Option<Rc<str>>,
    added_nodes: Vec<GcRef>,
    removed_nodes: Vec<GcRef>,
    previous_sibling: Option<GcRef>,
    next_sibling: Option<GcRef>,
}

impl MutationRecord {
    fn empty(mutation_type: MutationType, target: GcRef) -> Self {
        Self {
            mutation_type,
            target,
            attribute_name: None,
            old_value: None,
            added_nodes: Vec::new(),
            removed_nodes: Vec::new(),
            previous_sibling: None,
            next_sibling: None,
        }
    }

    /// `childList` record
    pub fn child_list(
        target: GcRef,
        added_nodes: Vec<GcRef>,
        removed_nodes: Vec<GcRef>,
        previous_sibling: Option<GcRef>,
        next_sibling: Option<GcRef>,
    ) -> Rc<Self> {
        Rc::new(Self {
            added_nodes,
            removed_nodes,
            previous_sibling,
            next_sibling,
            ..Self::empty(MutationType::ChildList, target)
        })
    }

    /// `attributes` record
    pub fn attributes(target: GcRef, attribute_name: &str, old_value: Option<&str>) -> Rc<Self> {
        Rc::new(Self {
            attribute_name: Some(Rc::from(attribute_name)),
            old_value: old_value.map(Rc::from),
            ..Self::empty(MutationType::Attributes, target)
        })
    }

    /// `characterData` record
    pub fn character_data(target: GcRef, old_value: Option<&str>) -> Rc<Self> {
        Rc::new(Self {
            old_value: old_value.map(Rc::from),
            ..Self::empty(MutationType::CharacterData, target)
        })
    }

    /// Copy of `record` without its old value. Reuses `record` when it has none.
    pub fn with_null_old_value(record: &Rc<Self>) -> Rc<Self> {
        if record.old_value.is_none() {
            return Rc::clone(record);
        }
        Rc::new(Self {
            old_value: None,
            ..(**record).clone()
        })
    }

    /// Mutation kind
    pub fn mutation_type(&self) -> MutationType {
        self.mutation_type
    }

    /// Mutated node
    pub fn target(&self) -> GcRef {
        self.target
    }

    /// Changed attribute, for `attributes` records
    pub fn attribute_name(&self) -> Option<&str> {
        self.attribute_name.as_deref()
    }

    /// Value before the mutation, if recorded
    pub fn old_value(&self) -> Option<&str> {
        self.old_value.as_deref()
    }

    /// Inserted nodes
    pub fn added_nodes(&self) -> &[GcRef] {
        &self.added_nodes
    }

    /// Removed nodes
    pub fn removed_nodes(&self) -> &[GcRef] {
        &self.removed_nodes
    }

    /// Sibling before the changed children
    pub fn previous_sibling(&self) -> Option<GcRef> {
        self.previous_sibling
    }

    /// Sibling after the changed children
    pub fn next_sibling(&self) -> Option<GcRef> {
        self.next_sibling
    }
}

impl Trace for MutationRecord {
    fn trace(&self, tracer: &mut dyn Tracer) {
        tracer.visit(self.target);
        self.added_nodes.trace(tracer);
        self.removed_nodes.trace(tracer);
        self.previous_sibling.trace(tracer);
        self.next_sibling.trace(tracer);
    }
}

/// A script `MutationObserver` and its pending record queue
pub struct MutationObserver {
    callback: Value,
    records: RefCell<Vec<Rc<MutationRecord>>>,
}

impl MutationObserver {
    /// Create an observer for `callback`
    pub fn new(callback: Value) -> Rc<Self> {
        Rc::new(Self {
            callback,
            records: RefCell::new(Vec::new()),
        })
    }

    /// Script callback
    pub fn callback(&self) -> &Value {
        &self.callback
    }

    /// Queue a record for the next delivery
    pub fn enqueue_mutation_record(&self, record: Rc<MutationRecord>) {
        self.records.borrow_mut().push(record);
    }

    /// Take the queued records (`takeRecords()`)
    pub fn take_records(&self) -> Vec<Rc<MutationRecord>> {
        self.records.take()
    }

    /// Whether records are queued
    pub fn has_pending_records(&self) -> bool {
        !self.records.borrow().is_empty()
    }
}

impl Trace for MutationObserver {
    fn trace(&self, tracer: &mut dyn Tracer) {
        self.callback.trace(tracer);
        self.records.trace(tracer);
    }
}

impl fmt::Debug for MutationObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutationObserver")
            .field("callback", &self.callback)
            .field("pending", &self.records.borrow().len())
            .finish()
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
struct ObserverKey(*const MutationObserver);

impl ObserverKey {
    fn of(observer: &Rc<MutationObserver>) -> Self {
        Self(Rc::as_ptr(observer))
    }
}

/// Interested observers with their merged options, in registration order
#[derive(Default)]
pub struct MutationObserverOptionsMap {
    observers: IndexMap<ObserverKey, (Rc<MutationObserver>, MutationObserverOptions)>,
}

impl MutationObserverOptionsMap {
    /// Create an empty map
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `observer`, merging `options` with any it already has
    pub fn add(&mut self, observer: &Rc<MutationObserver>, options: MutationObserverOptions) {
        self.observers
            .entry(ObserverKey::of(observer))
            .and_modify(|(_, merged)| *merged |= options)
            .or_insert_with(|| (Rc::clone(observer), options));
    }

    /// Merged options for `observer`
    pub fn options(&self, observer: &Rc<MutationObserver>) -> Option<MutationObserverOptions> {
        self.observers
            .get(&ObserverKey::of(observer))
            .map(|(_, options)| *options)
    }

    /// Observers and options in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&Rc<MutationObserver>, MutationObserverOptions)> {
        self.observers
            .values()
            .map(|(observer, options)| (observer, *options))
    }

    /// Number of observers
    pub fn len(&self) -> usize {
        self.observers.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

/// One `observe()` call on a node
pub struct MutationObserverRegistration {
    observer: Rc<MutationObserver>,
    options: MutationObserverOptions,
    attribute_filter: Vec<Rc<str>>,
}

impl MutationObserverRegistration {
    /// Registered observer
    pub fn observer(&self) -> &Rc<MutationObserver> {
        &self.observer
    }

    /// Registration options
    pub fn options(&self) -> MutationObserverOptions {
        self.options
    }

    /// Whether a mutation of `mutation_type` on this node (`is_target`) or a
    /// descendant should be delivered through this registration
    pub fn should_receive_mutation_from(
        &self,
        is_target: bool,
        mutation_type: MutationType,
        attribute_name: Option<&str>,
    ) -> bool {
        if !is_target && !self.options.contains(MutationObserverOptions::SUBTREE) {
            return false;
        }
        if !self.options.contains(mutation_type.option()) {
            return false;
        }
        if mutation_type != MutationType::Attributes
            || !self.options.contains(MutationObserverOptions::ATTRIBUTE_FILTER)
        {
            return true;
        }
        attribute_name
            .is_some_and(|name| self.attribute_filter.iter().any(|entry| &**entry == name))
    }
}

/// Observer registrations held by one node
#[derive(Default)]
pub struct MutationObserverRegistry {
    registrations: Vec<MutationObserverRegistration>,
}

impl MutationObserverRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `observer`. An existing registration of the same observer has
    /// its options and filter replaced.
    pub fn observe(
        &mut self,
        observer: &Rc<MutationObserver>,
        options: MutationObserverOptions,
        attribute_filter: &[&str],
    ) {
        let attribute_filter: Vec<Rc<str>> =
            attribute_filter.iter().map(|name| Rc::from(*name)).collect();
        let options = if attribute_filter.is_empty() {
            options
        } else {
            options | MutationObserverOptions::ATTRIBUTE_FILTER
        };

        if let Some(existing) = self
            .registrations
            .iter_mut()
            .find(|registration| Rc::ptr_eq(&registration.observer, observer))
        {
            existing.options = options;
            existing.attribute_filter = attribute_filter;
            return;
        }

        self.registrations.push(MutationObserverRegistration {
            observer: Rc::clone(observer),
            options,
            attribute_filter,
        });
    }

    /// Drop the registration of `observer`. Returns false if it had none.
    pub fn unobserve(&mut self, observer: &Rc<MutationObserver>) -> bool {
        let before = self.registrations.len();
        self.registrations
            .retain(|registration| !Rc::ptr_eq(&registration.observer, observer));
        self.registrations.len() != before
    }

    /// Add every matching registration to `observers`
    pub fn collect_interested(
        &self,
        observers: &mut MutationObserverOptionsMap,
        mutation_type: MutationType,
        attribute_name: Option<&str>,
        is_target: bool,
    ) {
        for registration in &self.registrations {
            if registration.should_receive_mutation_from(is_target, mutation_type, attribute_name) {
                observers.add(&registration.observer, registration.options);
            }
        }
    }

    /// Registrations in `observe()` order
    pub fn registrations(&self) -> &[MutationObserverRegistration] {
        &self.registrations
    }

    /// Number of registrations
    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }
}

impl Trace for MutationObserverRegistry {
    fn trace(&self, tracer: &mut dyn Tracer) {
        for registration in &self.registrations {
            registration.observer.trace(tracer);
        }
    }
}

/// A node that can report the observers interested in its mutations.
///
/// Implementations usually consult their own [`MutationObserverRegistry`]
/// with `is_target = true`, then every ancestor's with `is_target = false`.
pub trait ObservedNode {
    /// Collect observers registered for `mutation_type` (and `attribute_name`)
    fn registered_mutation_observers_of_type(
        &self,
        observers: &mut MutationObserverOptionsMap,
        mutation_type: MutationType,
        attribute_name: Option<&str>,
    );
}

/// Observers interested in one mutation
pub struct MutationObserverInterestGroup {
    observers: MutationObserverOptionsMap,
    old_value_flag: MutationObserverOptions,
}

impl MutationObserverInterestGroup {
    /// Build the group for a mutation of `target`; `None` when nobody listens.
    ///
    /// # Panics
    ///
    /// Panics if `attribute_name` is given for a non-attribute mutation or
    /// missing for an attribute mutation.
    pub fn create_if_needed<N: ObservedNode + ?Sized>(
        target: &N,
        mutation_type: MutationType,
        old_value_flag: MutationObserverOptions,
        attribute_name: Option<&str>,
    ) -> Option<Self> {
        assert_eq!(
            mutation_type == MutationType::Attributes,
            attribute_name.is_some(),
            "attribute name must be given exactly for attribute mutations"
        );

        let mut observers = MutationObserverOptionsMap::new();
        target.registered_mutation_observers_of_type(&mut observers, mutation_type, attribute_name);
        if observers.is_empty() {
            return None;
        }

        Some(Self {
            observers,
            old_value_flag,
        })
    }

    /// Group for a `childList` mutation
    pub fn for_child_list_mutation<N: ObservedNode + ?Sized>(target: &N) -> Option<Self> {
        Self::create_if_needed(
            target,
            MutationType::ChildList,
            MutationObserverOptions::empty(),
            None,
        )
    }

    /// Group for a `characterData` mutation
    pub fn for_character_data_mutation<N: ObservedNode + ?Sized>(target: &N) -> Option<Self> {
        Self::create_if_needed(
            target,
            MutationType::CharacterData,
            MutationObserverOptions::CHARACTER_DATA_OLD_VALUE,
            None,
        )
    }

    /// Group for an `attributes` mutation of `attribute_name`
    pub fn for_attributes_mutation<N: ObservedNode + ?Sized>(
        target: &N,
        attribute_name: &str,
    ) -> Option<Self> {
        Self::create_if_needed(
            target,
            MutationType::Attributes,
            MutationObserverOptions::ATTRIBUTE_OLD_VALUE,
            Some(attribute_name),
        )
    }

    /// Whether any member wants the pre-mutation value
    pub fn is_old_value_requested(&self) -> bool {
        self.observers
            .iter()
            .any(|(_, options)| self.has_old_value(options))
    }

    /// Deliver `record` to every member.
    ///
    /// Members that asked for the old value get `record` itself; the rest
    /// share one copy without it, made at most once.
    pub fn enqueue_mutation_record(&self, record: &Rc<MutationRecord>) {
        let mut without_old_value: Option<Rc<MutationRecord>> = None;

        for (observer, options) in self.observers.iter() {
            if self.has_old_value(options) {
                observer.enqueue_mutation_record(Rc::clone(record));
                continue;
            }
            let elided = without_old_value
                .get_or_insert_with(|| MutationRecord::with_null_old_value(record));
            observer.enqueue_mutation_record(Rc::clone(elided));
        }
    }

    /// Member observers
    pub fn observers(&self) -> &MutationObserverOptionsMap {
        &self.observers
    }

    /// Number of members
    pub fn len(&self) -> usize {
        self.observers.len()
    }

    /// Always false for a constructed group
    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    fn has_old_value(&self, options: MutationObserverOptions) -> bool {
        options.intersects(self.old_value_flag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(index: u32) -> GcRef {
        GcRef::from_raw_parts(index, 0)
    }

    struct Lone(MutationObserverRegistry);

    impl ObservedNode for Lone {
        fn registered_mutation_observers_of_type(
            &self,
            observers: &mut MutationObserverOptionsMap,
            mutation_type: MutationType,
            attribute_name: Option<&str>,
        ) {
            self.0
                .collect_interested(observers, mutation_type, attribute_name, true);
        }
    }

    // ==================== Options ====================

    #[test]
    fn test_options_bits() {
        let options = MutationObserverOptions::ATTRIBUTES | MutationObserverOptions::SUBTREE;
        assert!(options.contains(MutationObserverOptions::ATTRIBUTES));
        assert!(!options.contains(MutationObserverOptions::CHILD_LIST));
        let subtree_or_children =
            MutationObserverOptions::SUBTREE | MutationObserverOptions::CHILD_LIST;
        assert!(options.intersects(subtree_or_children));
        assert!(MutationObserverOptions::empty().is_empty());
    }

    #[test]
    fn test_options_map_merges() {
        let observer = MutationObserver::new(Value::undefined());
        let mut map = MutationObserverOptionsMap::new();
        map.add(&observer, MutationObserverOptions::CHILD_LIST);
        map.add(&observer, MutationObserverOptions::ATTRIBUTE_OLD_VALUE);

        assert_eq!(map.len(), 1);
        assert_eq!(
            map.options(&observer),
            Some(MutationObserverOptions::CHILD_LIST | MutationObserverOptions::ATTRIBUTE_OLD_VALUE)
        );
    }

    // ==================== Records ====================

    #[test]
    fn test_null_old_value_reuses_record_without_value() {
        let record = MutationRecord::character_data(node(1), None);
        let elided = MutationRecord::with_null_old_value(&record);
        assert!(Rc::ptr_eq(&record, &elided));

        let record = MutationRecord::attributes(node(1), "class", Some("a"));
        let elided = MutationRecord::with_null_old_value(&record);
        assert!(!Rc::ptr_eq(&record, &elided));
        assert_eq!(elided.old_value(), None);
        assert_eq!(elided.attribute_name(), Some("class"));
    }

    #[test]
    fn test_record_trace_visits_nodes() {
        let record =
            MutationRecord::child_list(node(1), vec![node(2)], vec![node(3)], Some(node(4)), None);
        let mut seen = Vec::new();
        record.trace(&mut |handle: GcRef| seen.push(handle));
        assert_eq!(seen, vec![node(1), node(2), node(3), node(4)]);
    }

    // ==================== Registration ====================

    #[test]
    fn test_observe_replaces_existing_registration() {
        let observer = MutationObserver::new(Value::undefined());
        let mut registry = MutationObserverRegistry::new();
        registry.observe(&observer, MutationObserverOptions::CHILD_LIST, &[]);
        registry.observe(&observer, MutationObserverOptions::ATTRIBUTES, &["id"]);

        assert_eq!(registry.len(), 1);
        let options = registry.registrations()[0].options();
        assert!(options.contains(MutationObserverOptions::ATTRIBUTE_FILTER));
        assert!(!options.contains(MutationObserverOptions::CHILD_LIST));

        assert!(registry.unobserve(&observer));
        assert!(!registry.unobserve(&observer));
    }

    #[test]
    fn test_subtree_required_for_descendants() {
        let observer = MutationObserver::new(Value::undefined());
        let mut registry = MutationObserverRegistry::new();
        registry.observe(&observer, MutationObserverOptions::CHILD_LIST, &[]);
        let registration = &registry.registrations()[0];

        assert!(registration.should_receive_mutation_from(true, MutationType::ChildList, None));
        assert!(!registration.should_receive_mutation_from(false, MutationType::ChildList, None));
    }

    #[test]
    fn test_attribute_filter() {
        let observer = MutationObserver::new(Value::undefined());
        let mut registry = MutationObserverRegistry::new();
        registry.observe(&observer, MutationObserverOptions::ATTRIBUTES, &["id", "class"]);
        let registration = &registry.registrations()[0];

        assert!(registration.should_receive_mutation_from(
            true,
            MutationType::Attributes,
            Some("class")
        ));
        assert!(!registration.should_receive_mutation_from(
            true,
            MutationType::Attributes,
            Some("style")
        ));
    }

    // ==================== Interest group ====================

    #[test]
    fn test_no_group_without_observers() {
        let target = Lone(MutationObserverRegistry::new());
        assert!(MutationObserverInterestGroup::for_child_list_mutation(&target).is_none());
    }

    #[test]
    #[should_panic(expected = "attribute name")]
    fn test_attribute_name_on_child_list_panics() {
        let target = Lone(MutationObserverRegistry::new());
        MutationObserverInterestGroup::create_if_needed(
            &target,
            MutationType::ChildList,
            MutationObserverOptions::empty(),
            Some("id"),
        );
    }

    #[test]
    fn test_enqueue_shares_one_elided_copy() {
        let wants_old = MutationObserver::new(Value::undefined());
        let plain_a = MutationObserver::new(Value::undefined());
        let plain_b = MutationObserver::new(Value::undefined());

        let mut registry = MutationObserverRegistry::new();
        registry.observe(
            &wants_old,
            MutationObserverOptions::ATTRIBUTES | MutationObserverOptions::ATTRIBUTE_OLD_VALUE,
            &[],
        );
        registry.observe(&plain_a, MutationObserverOptions::ATTRIBUTES, &[]);
        registry.observe(&plain_b, MutationObserverOptions::ATTRIBUTES, &[]);
        let target = Lone(registry);

        let group = MutationObserverInterestGroup::for_attributes_mutation(&target, "id").unwrap();
        assert!(group.is_old_value_requested());
        assert_eq!(group.len(), 3);

        let record = MutationRecord::attributes(node(1), "id", Some("before"));
        group.enqueue_mutation_record(&record);

        let original = wants_old.take_records();
        let a = plain_a.take_records();
        let b = plain_b.take_records();
        assert!(Rc::ptr_eq(&original[0], &record));
        assert_eq!(a[0].old_value(), None);
        assert!(Rc::ptr_eq(&a[0], &b[0]));
    }
}
