// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Destinations: user-facing printer references and the sorted list that
//! holds them.
//!
//! A destination is `(name, optional instance, is-default, options)`.
//! Lists stay sorted on `(name, instance)` with the no-instance entry
//! first, so lookups use binary search; the search is hinted with the
//! previous match index to exploit sequential access.

mod enumerate;
mod lpoptions;
mod options;
mod resolve;
mod txt;

pub use enumerate::{enum_dests, enumerate, get_dests, Destinations, EnumOptions};
pub use lpoptions::{load_overlay, save_dests, Overlay};
pub use options::{options_to_string, parse_options, DestFlags, Options, PrinterType};
pub use resolve::resolve_device_uri;
pub use txt::{apply_txt, queue_name, TxtOutcome};

use std::cmp::Ordering;

// ============================================================================
// Destination
// ============================================================================

/// One user-facing printer reference.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Destination {
    /// Queue name; unique (case-insensitively) within a set.
    pub name: String,
    /// Optional instance label (`name/instance`).
    pub instance: Option<String>,
    /// At most one destination in a set is the default.
    pub is_default: bool,
    /// Ordered option list.
    pub options: Options,
}

impl Destination {
    pub fn new(name: &str, instance: Option<&str>) -> Destination {
        Destination {
            name: name.to_string(),
            instance: instance.map(str::to_string),
            is_default: false,
            options: Options::new(),
        }
    }

    /// Case-insensitive option lookup.
    pub fn option(&self, name: &str) -> Option<&str> {
        self.options.get(name)
    }

    /// `device-uri` option.
    pub fn device_uri(&self) -> Option<&str> {
        self.options.get("device-uri")
    }

    /// `printer-type` option parsed as a bitmask (decimal or 0x hex).
    pub fn printer_type(&self) -> PrinterType {
        let Some(value) = self.options.get("printer-type") else {
            return PrinterType::NONE;
        };
        let parsed = if let Some(hex) = value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
            u32::from_str_radix(hex, 16)
        } else {
            value.parse::<u32>()
        };
        PrinterType(parsed.unwrap_or(0))
    }

    /// `name` or `name/instance` display form.
    pub fn full_name(&self) -> String {
        match &self.instance {
            Some(instance) => format!("{}/{}", self.name, instance),
            None => self.name.clone(),
        }
    }
}

/// Sort order: name, then instance with `None` first, case-insensitive.
pub fn compare_dests(a: &Destination, b: &Destination) -> Ordering {
    compare_keys(&a.name, a.instance.as_deref(), b)
}

fn compare_keys(name: &str, instance: Option<&str>, b: &Destination) -> Ordering {
    let by_name = cmp_ignore_case(name, &b.name);
    if by_name != Ordering::Equal {
        return by_name;
    }
    match (instance, b.instance.as_deref()) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => cmp_ignore_case(a, b),
    }
}

fn cmp_ignore_case(a: &str, b: &str) -> Ordering {
    a.bytes()
        .map(|c| c.to_ascii_lowercase())
        .cmp(b.bytes().map(|c| c.to_ascii_lowercase()))
}

// ============================================================================
// Sorted destination list
// ============================================================================

/// A sorted set of destinations supporting hinted binary search.
#[derive(Clone, Debug, Default)]
pub struct DestList {
    dests: Vec<Destination>,
    /// Hint: index of the previous match.
    prev: usize,
}

impl DestList {
    pub fn new() -> DestList {
        DestList {
            dests: Vec::new(),
            prev: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.dests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dests.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Destination> {
        self.dests.iter()
    }

    pub fn as_slice(&self) -> &[Destination] {
        &self.dests
    }

    /// Find `(name, instance)`, or the default destination when `name`
    /// is `None`.
    pub fn get(&mut self, name: Option<&str>, instance: Option<&str>) -> Option<&Destination> {
        match name {
            None => self.dests.iter().find(|d| d.is_default),
            Some(name) => {
                let (index, diff) = self.find_hinted(name, instance, self.prev);
                if diff == Ordering::Equal {
                    self.prev = index;
                    Some(&self.dests[index])
                } else {
                    None
                }
            }
        }
    }

    /// All entries sharing a base name (base first, then instances).
    pub fn matching_name<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a Destination> + 'a {
        let name = name.to_string();
        self.dests
            .iter()
            .filter(move |d| d.name.eq_ignore_ascii_case(&name))
    }

    /// Hinted binary search.
    ///
    /// Checks the previous index (and its neighbors, implicitly, via the
    /// narrowed interval) before bisecting.  Returns the closest index and
    /// the comparison result at that index (`Equal` on a hit).
    pub fn find_hinted(
        &self,
        name: &str,
        instance: Option<&str>,
        prev: usize,
    ) -> (usize, Ordering) {
        if self.dests.is_empty() {
            return (0, Ordering::Less);
        }

        let count = self.dests.len();
        let (mut left, mut right);

        if prev < count {
            // Start on either side of the previous match.
            let diff = compare_keys(name, instance, &self.dests[prev]);
            if diff == Ordering::Equal
                || (diff == Ordering::Less && prev == 0)
                || (diff == Ordering::Greater && prev == count - 1)
            {
                return (prev, diff);
            }
            if diff == Ordering::Less {
                left = 0;
                right = prev;
            } else {
                left = prev;
                right = count - 1;
            }
        } else {
            left = 0;
            right = count - 1;
        }

        let mut current;
        let mut diff;
        loop {
            current = (left + right) / 2;
            diff = compare_keys(name, instance, &self.dests[current]);
            if diff == Ordering::Equal {
                return (current, diff);
            }
            if diff == Ordering::Less {
                right = current;
            } else {
                left = current;
            }
            if right - left <= 1 {
                break;
            }
        }

        // Check the final one or two candidates.
        let diff_left = compare_keys(name, instance, &self.dests[left]);
        if diff_left != Ordering::Greater {
            return (left, diff_left);
        }
        let diff_right = compare_keys(name, instance, &self.dests[right]);
        (right, diff_right)
    }

    /// Insert a destination, keeping the list sorted.  An existing entry
    /// with the same key is replaced.
    pub fn insert(&mut self, dest: Destination) {
        let (index, diff) = self.find_hinted(&dest.name, dest.instance.as_deref(), self.prev);
        match diff {
            Ordering::Equal => self.dests[index] = dest,
            Ordering::Less => self.dests.insert(index, dest),
            Ordering::Greater => self.dests.insert(index + 1, dest),
        }
    }

    /// Add a saved-options container for `name[/instance]`.
    ///
    /// Adding an instance first creates the base entry, then copies the
    /// base entry's options into the new instance.  Adding an existing
    /// key leaves the list unchanged.
    pub fn add(&mut self, name: &str, instance: Option<&str>) {
        if self.get(Some(name), instance).is_some() {
            return;
        }

        if instance.is_some() && self.get(Some(name), None).is_none() {
            self.insert(Destination::new(name, None));
        }

        let mut dest = Destination::new(name, instance);
        if instance.is_some() {
            if let Some(parent) = self.get(Some(name), None) {
                dest.options = parent.options.clone();
            }
        }
        self.insert(dest);
    }

    /// Remove one destination; returns whether it existed.
    pub fn remove(&mut self, name: &str, instance: Option<&str>) -> bool {
        let (index, diff) = self.find_hinted(name, instance, self.prev);
        if diff == Ordering::Equal {
            self.dests.remove(index);
            self.prev = 0;
            true
        } else {
            false
        }
    }

    /// Copy a destination (deep copy of its options) into this list.
    pub fn copy_in(&mut self, dest: &Destination) {
        self.insert(dest.clone());
    }

    /// Clear `is_default` everywhere, then set it on `name[/instance]`.
    pub fn set_default(&mut self, name: &str, instance: Option<&str>) {
        for dest in &mut self.dests {
            dest.is_default = false;
        }
        let (index, diff) = self.find_hinted(name, instance, 0);
        if diff == Ordering::Equal {
            self.dests[index].is_default = true;
        }
    }

    /// The list stays sorted across all mutations; used by tests.
    pub fn is_sorted(&self) -> bool {
        self.dests
            .windows(2)
            .all(|w| compare_dests(&w[0], &w[1]) == Ordering::Less)
    }
}

impl IntoIterator for DestList {
    type Item = Destination;
    type IntoIter = std::vec::IntoIter<Destination>;

    fn into_iter(self) -> Self::IntoIter {
        self.dests.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list_of(names: &[(&str, Option<&str>)]) -> DestList {
        let mut list = DestList::new();
        for (name, instance) in names {
            list.insert(Destination::new(name, *instance));
        }
        list
    }

    #[test]
    fn test_sort_order_instance_after_base() {
        let list = list_of(&[
            ("Laser", Some("draft")),
            ("Laser", None),
            ("Inkjet", None),
        ]);
        let keys: Vec<String> = list.iter().map(|d| d.full_name()).collect();
        assert_eq!(keys, vec!["Inkjet", "Laser", "Laser/draft"]);
        assert!(list.is_sorted());
    }

    #[test]
    fn test_get_case_insensitive() {
        let mut list = list_of(&[("Laser", None)]);
        assert!(list.get(Some("laser"), None).is_some());
        assert!(list.get(Some("LASER"), None).is_some());
        assert!(list.get(Some("laser"), Some("x")).is_none());
    }

    #[test]
    fn test_add_instance_copies_parent_options() {
        let mut list = DestList::new();
        let mut base = Destination::new("Photo", None);
        base.options.set("media", "na_letter_8.5x11in");
        list.insert(base);

        list.add("Photo", Some("draft"));
        let draft = list.get(Some("Photo"), Some("draft")).unwrap();
        assert_eq!(draft.option("media"), Some("na_letter_8.5x11in"));
    }

    #[test]
    fn test_add_instance_creates_base() {
        let mut list = DestList::new();
        list.add("New", Some("inst"));
        assert!(list.get(Some("New"), None).is_some());
        assert!(list.get(Some("New"), Some("inst")).is_some());
        assert!(list.is_sorted());
    }

    #[test]
    fn test_remove_keeps_sorted() {
        let mut list = list_of(&[("A", None), ("B", None), ("C", None)]);
        assert!(list.remove("B", None));
        assert!(!list.remove("B", None));
        assert!(list.is_sorted());
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn test_set_default_unique() {
        let mut list = list_of(&[("A", None), ("B", None)]);
        list.set_default("A", None);
        list.set_default("B", None);
        let defaults: Vec<&Destination> = list.iter().filter(|d| d.is_default).collect();
        assert_eq!(defaults.len(), 1);
        assert_eq!(defaults[0].name, "B");
    }

    #[test]
    fn test_binary_search_equals_linear_scan() {
        let mut list = DestList::new();
        for i in 0..100 {
            list.insert(Destination::new(&format!("printer-{:03}", i), None));
        }

        for i in 0..100 {
            let name = format!("printer-{:03}", i);
            let (index, diff) = list.find_hinted(&name, None, 0);
            assert_eq!(diff, Ordering::Equal);
            let linear = list
                .iter()
                .position(|d| d.name.eq_ignore_ascii_case(&name))
                .unwrap();
            assert_eq!(index, linear);
        }
    }

    #[test]
    fn test_hinted_search_matches_naive_on_random_names() {
        // Property: the hinted search agrees with a naive binary search
        // for every element, whatever hint it is given.
        let mut list = DestList::new();
        let mut rng_state = fastrand::Rng::with_seed(0x5eed);
        let mut names = Vec::new();
        while list.len() < 10_000 {
            let name: String = (0..8)
                .map(|_| (b'a' + rng_state.u8(0..26)) as char)
                .collect();
            if list.get(Some(&name), None).is_none() {
                names.push(name.clone());
                list.insert(Destination::new(&name, None));
            }
        }

        for name in &names {
            let naive = list
                .as_slice()
                .binary_search_by(|d| {
                    compare_keys(name, None, d).reverse()
                })
                .expect("name must be present");

            let hint = rng_state.usize(0..list.len() + 2);
            let (index, diff) = list.find_hinted(name, None, hint);
            assert_eq!(diff, Ordering::Equal, "lookup of {} failed", name);
            assert_eq!(index, naive, "hinted vs naive for {}", name);
        }
    }

    #[test]
    fn test_insert_replaces_same_key() {
        let mut list = DestList::new();
        let mut a = Destination::new("Laser", None);
        a.options.set("media", "a4");
        list.insert(a);

        let mut b = Destination::new("laser", None);
        b.options.set("media", "letter");
        list.insert(b);

        assert_eq!(list.len(), 1);
        assert_eq!(list.get(Some("Laser"), None).unwrap().option("media"), Some("letter"));
    }
}
