//! Method hooks over a dynamic dispatch table
//!
//! Redirects a (type, selector) dispatch entry instead of a raw address.
//! Unhooking removes the record from tracking only — the engine does not
//! retain enough state to restore prior behavior. Callers that ever need
//! restoration MUST keep the original implementation returned by
//! [`MethodHookEngine::hook`] and write it back themselves. This
//! asymmetry is a contract of the engine, not an oversight.

use crate::error::{Result, SpecterError};
use super::dispatch::{ClassHandle, DispatchTable, SelectorHandle};
use std::collections::HashMap;
use std::sync::Mutex;

/// one redirected dispatch entry
#[derive(Debug, Clone)]
pub struct MethodHookRecord {
    /// owning type name
    pub class_name: String,
    /// method selector name
    pub selector_name: String,
    /// resolved type handle
    pub class: ClassHandle,
    /// resolved selector handle
    pub selector: SelectorHandle,
    /// implementation pointer that was in the table before the hook
    pub original: usize,
}

impl MethodHookRecord {
    /// diagnostic key, `Class::selector`
    pub fn key(&self) -> String {
        format!("{}::{}", self.class_name, self.selector_name)
    }
}

/// method hook engine over a dispatch table capability
pub struct MethodHookEngine<D> {
    table: D,
    methods: Mutex<HashMap<(String, String), MethodHookRecord>>,
}

impl<D: DispatchTable> MethodHookEngine<D> {
    /// create an engine over the given dispatch table
    pub fn new(table: D) -> Self {
        Self {
            table,
            methods: Mutex::new(HashMap::new()),
        }
    }

    /// redirect (class, selector) to `replacement`
    ///
    /// resolution failures are surfaced distinctly: `TypeNotFound`,
    /// `SelectorRegistrationFailed`, `MethodNotFound`. on success the
    /// previous implementation is returned; retain it if restoration is
    /// ever needed, the engine will not.
    pub fn hook(&self, class_name: &str, selector_name: &str, replacement: usize) -> Result<usize> {
        if replacement == 0 {
            return Err(SpecterError::InvalidArgument { context: "hook: null replacement" });
        }

        let key = (class_name.to_string(), selector_name.to_string());
        let mut methods = self.methods.lock().unwrap();

        if methods.contains_key(&key) {
            return Err(SpecterError::MethodAlreadyHooked {
                class: class_name.to_string(),
                selector: selector_name.to_string(),
            });
        }

        let class = self
            .table
            .resolve_class(class_name)
            .ok_or_else(|| SpecterError::TypeNotFound {
                class: class_name.to_string(),
            })?;

        let selector = self.table.resolve_selector(selector_name).ok_or_else(|| {
            SpecterError::SelectorRegistrationFailed {
                selector: selector_name.to_string(),
            }
        })?;

        // read the current entry first so failure leaves the table alone
        self.table
            .implementation(class, selector)
            .ok_or_else(|| SpecterError::MethodNotFound {
                class: class_name.to_string(),
                selector: selector_name.to_string(),
            })?;

        // single swap call: concurrent callers of the method observe
        // either the old or the new implementation
        let original = self
            .table
            .set_implementation(class, selector, replacement)
            .ok_or_else(|| SpecterError::ImplementationSwapFailed {
                class: class_name.to_string(),
                selector: selector_name.to_string(),
            })?;

        let record = MethodHookRecord {
            class_name: class_name.to_string(),
            selector_name: selector_name.to_string(),
            class,
            selector,
            original,
        };
        log::debug!("hooked method {}", record.key());
        methods.insert(key, record);

        Ok(original)
    }

    /// drop the tracking record for (class, selector)
    ///
    /// does NOT restore the previous implementation — the dispatch entry
    /// keeps pointing at the replacement. see the module docs.
    pub fn unhook(&self, class_name: &str, selector_name: &str) -> Result<()> {
        let key = (class_name.to_string(), selector_name.to_string());
        let mut methods = self.methods.lock().unwrap();

        let record = methods
            .remove(&key)
            .ok_or_else(|| SpecterError::MethodNotHooked {
                class: class_name.to_string(),
                selector: selector_name.to_string(),
            })?;

        log::debug!(
            "method {} removed from tracking (implementation not restored)",
            record.key()
        );
        Ok(())
    }

    /// drop every tracking record; implementations are not restored
    pub fn clear_all(&self) {
        self.methods.lock().unwrap().clear();
    }

    /// check whether (class, selector) is tracked as hooked
    pub fn is_hooked(&self, class_name: &str, selector_name: &str) -> bool {
        self.methods
            .lock()
            .unwrap()
            .contains_key(&(class_name.to_string(), selector_name.to_string()))
    }

    /// saved original implementation for a hooked method
    pub fn original(&self, class_name: &str, selector_name: &str) -> Option<usize> {
        self.methods
            .lock()
            .unwrap()
            .get(&(class_name.to_string(), selector_name.to_string()))
            .map(|r| r.original)
    }

    /// number of tracked method hooks
    pub fn count(&self) -> usize {
        self.methods.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as Map;
    use std::sync::Mutex as TestMutex;

    /// dispatch table fake over a plain (class, selector) -> imp map
    struct FakeDispatchTable {
        classes: Vec<&'static str>,
        entries: TestMutex<Map<(usize, usize), usize>>,
        selectors: TestMutex<Vec<String>>,
    }

    impl FakeDispatchTable {
        fn new(classes: Vec<&'static str>) -> Self {
            Self {
                classes,
                entries: TestMutex::new(Map::new()),
                selectors: TestMutex::new(Vec::new()),
            }
        }

        fn define(&self, class: &str, selector: &str, imp: usize) {
            let class = self.resolve_class(class).unwrap();
            let selector = self.resolve_selector(selector).unwrap();
            self.entries.lock().unwrap().insert((class.0, selector.0), imp);
        }

        fn entry(&self, class: &str, selector: &str) -> Option<usize> {
            let class = self.resolve_class(class)?;
            let selector = self.resolve_selector(selector)?;
            self.entries.lock().unwrap().get(&(class.0, selector.0)).copied()
        }
    }

    impl DispatchTable for FakeDispatchTable {
        fn resolve_class(&self, name: &str) -> Option<ClassHandle> {
            self.classes
                .iter()
                .position(|&c| c == name)
                .map(|i| ClassHandle(i + 1))
        }

        fn resolve_selector(&self, name: &str) -> Option<SelectorHandle> {
            let mut selectors = self.selectors.lock().unwrap();
            let index = match selectors.iter().position(|s| s == name) {
                Some(i) => i,
                None => {
                    selectors.push(name.to_string());
                    selectors.len() - 1
                }
            };
            Some(SelectorHandle(index + 1))
        }

        fn implementation(&self, class: ClassHandle, selector: SelectorHandle) -> Option<usize> {
            self.entries.lock().unwrap().get(&(class.0, selector.0)).copied()
        }

        fn set_implementation(
            &self,
            class: ClassHandle,
            selector: SelectorHandle,
            implementation: usize,
        ) -> Option<usize> {
            self.entries
                .lock()
                .unwrap()
                .insert((class.0, selector.0), implementation)
        }
    }

    fn engine_with_foo_bar() -> MethodHookEngine<FakeDispatchTable> {
        let table = FakeDispatchTable::new(vec!["Foo", "Widget"]);
        table.define("Foo", "bar", 0xAAAA);
        MethodHookEngine::new(table)
    }

    #[test]
    fn hook_swaps_entry_and_returns_original() {
        let engine = engine_with_foo_bar();
        let original = engine.hook("Foo", "bar", 0xBBBB).unwrap();

        assert_eq!(original, 0xAAAA);
        assert_eq!(engine.table.entry("Foo", "bar"), Some(0xBBBB));
        assert!(engine.is_hooked("Foo", "bar"));
        assert_eq!(engine.original("Foo", "bar"), Some(0xAAAA));
    }

    #[test]
    fn unknown_type_fails_without_tracking() {
        let engine = engine_with_foo_bar();
        let result = engine.hook("Nope", "bar", 0xBBBB);

        assert_eq!(
            result,
            Err(SpecterError::TypeNotFound { class: "Nope".into() })
        );
        assert_eq!(engine.count(), 0);
    }

    #[test]
    fn missing_method_fails_distinctly() {
        let engine = engine_with_foo_bar();
        let result = engine.hook("Widget", "bar", 0xBBBB);

        assert!(matches!(result, Err(SpecterError::MethodNotFound { .. })));
        // dispatch table untouched
        assert_eq!(engine.table.entry("Widget", "bar"), None);
        assert_eq!(engine.count(), 0);
    }

    #[test]
    fn double_hook_fails_and_keeps_first() {
        let engine = engine_with_foo_bar();
        engine.hook("Foo", "bar", 0xBBBB).unwrap();

        let result = engine.hook("Foo", "bar", 0xCCCC);
        assert!(matches!(result, Err(SpecterError::MethodAlreadyHooked { .. })));
        assert_eq!(engine.table.entry("Foo", "bar"), Some(0xBBBB));
        assert_eq!(engine.original("Foo", "bar"), Some(0xAAAA));
    }

    #[test]
    fn unhook_drops_tracking_but_not_the_redirect() {
        let engine = engine_with_foo_bar();
        engine.hook("Foo", "bar", 0xBBBB).unwrap();
        engine.unhook("Foo", "bar").unwrap();

        assert!(!engine.is_hooked("Foo", "bar"));
        // documented limitation: the entry still points at the replacement
        assert_eq!(engine.table.entry("Foo", "bar"), Some(0xBBBB));
    }

    #[test]
    fn caller_can_restore_with_retained_original() {
        let engine = engine_with_foo_bar();
        let original = engine.hook("Foo", "bar", 0xBBBB).unwrap();
        engine.unhook("Foo", "bar").unwrap();

        // the restoration path the contract requires of callers
        let class = engine.table.resolve_class("Foo").unwrap();
        let selector = engine.table.resolve_selector("bar").unwrap();
        engine.table.set_implementation(class, selector, original);

        assert_eq!(engine.table.entry("Foo", "bar"), Some(0xAAAA));
    }

    #[test]
    fn unhook_of_untracked_method_fails() {
        let engine = engine_with_foo_bar();
        assert!(matches!(
            engine.unhook("Foo", "bar"),
            Err(SpecterError::MethodNotHooked { .. })
        ));
    }

    #[test]
    fn clear_all_empties_tracking_only() {
        let engine = engine_with_foo_bar();
        engine.table.define("Widget", "spin", 0x1111);
        engine.hook("Foo", "bar", 0xBBBB).unwrap();
        engine.hook("Widget", "spin", 0x2222).unwrap();

        engine.clear_all();
        assert_eq!(engine.count(), 0);
        assert_eq!(engine.table.entry("Foo", "bar"), Some(0xBBBB));
        assert_eq!(engine.table.entry("Widget", "spin"), Some(0x2222));
    }

    #[test]
    fn record_key_uses_double_colon_format() {
        let record = MethodHookRecord {
            class_name: "Foo".into(),
            selector_name: "bar".into(),
            class: ClassHandle(1),
            selector: SelectorHandle(1),
            original: 0xAAAA,
        };
        assert_eq!(record.key(), "Foo::bar");
    }
}
