//! Dynamic dispatch table abstraction
//!
//! Late-binding object runtimes resolve call sites through a per-type
//! table mapping selectors to implementations. This capability interface
//! covers the four primitives the method-hook engine needs; the real
//! Objective-C runtime implements it on Apple targets, and tests
//! implement it over a plain map.

/// opaque handle to a resolved runtime type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClassHandle(pub usize);

/// opaque handle to a registered selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SelectorHandle(pub usize);

/// dynamic dispatch table capability
///
/// all four operations may fail independently; the method-hook engine
/// surfaces which one did.
pub trait DispatchTable {
    /// resolve a type by name
    fn resolve_class(&self, name: &str) -> Option<ClassHandle>;

    /// register/resolve a selector by name
    fn resolve_selector(&self, name: &str) -> Option<SelectorHandle>;

    /// current implementation pointer for (class, selector)
    fn implementation(&self, class: ClassHandle, selector: SelectorHandle) -> Option<usize>;

    /// overwrite the dispatch entry, returning the previous implementation
    ///
    /// must be atomic from the perspective of concurrent callers of the
    /// method: they observe either the old or the new implementation,
    /// never a torn state.
    fn set_implementation(
        &self,
        class: ClassHandle,
        selector: SelectorHandle,
        implementation: usize,
    ) -> Option<usize>;
}

/// Objective-C runtime dispatch table
#[cfg(any(target_os = "macos", target_os = "ios"))]
#[derive(Debug, Clone, Copy, Default)]
pub struct ObjcDispatchTable;

#[cfg(any(target_os = "macos", target_os = "ios"))]
impl ObjcDispatchTable {
    pub fn new() -> Self {
        Self
    }

    fn instance_method(&self, class: ClassHandle, selector: SelectorHandle) -> Option<usize> {
        // SAFETY: handles originate from objc_getClass/sel_registerName
        let method = unsafe {
            class_getInstanceMethod(
                class.0 as *mut core::ffi::c_void,
                selector.0 as *mut core::ffi::c_void,
            )
        };
        if method.is_null() {
            None
        } else {
            Some(method as usize)
        }
    }
}

#[cfg(any(target_os = "macos", target_os = "ios"))]
impl DispatchTable for ObjcDispatchTable {
    fn resolve_class(&self, name: &str) -> Option<ClassHandle> {
        let cname = std::ffi::CString::new(name).ok()?;
        // SAFETY: cname is a valid NUL-terminated string
        let class = unsafe { objc_getClass(cname.as_ptr()) };
        if class.is_null() {
            None
        } else {
            Some(ClassHandle(class as usize))
        }
    }

    fn resolve_selector(&self, name: &str) -> Option<SelectorHandle> {
        let cname = std::ffi::CString::new(name).ok()?;
        // SAFETY: cname is a valid NUL-terminated string
        let selector = unsafe { sel_registerName(cname.as_ptr()) };
        if selector.is_null() {
            None
        } else {
            Some(SelectorHandle(selector as usize))
        }
    }

    fn implementation(&self, class: ClassHandle, selector: SelectorHandle) -> Option<usize> {
        let method = self.instance_method(class, selector)?;
        // SAFETY: method handle came from class_getInstanceMethod
        let imp = unsafe { method_getImplementation(method as *mut core::ffi::c_void) };
        if imp.is_null() {
            None
        } else {
            Some(imp as usize)
        }
    }

    fn set_implementation(
        &self,
        class: ClassHandle,
        selector: SelectorHandle,
        implementation: usize,
    ) -> Option<usize> {
        let method = self.instance_method(class, selector)?;
        // SAFETY: method_setImplementation swaps the entry atomically and
        // returns the previous implementation
        let previous = unsafe {
            method_setImplementation(
                method as *mut core::ffi::c_void,
                implementation as *mut core::ffi::c_void,
            )
        };
        if previous.is_null() {
            None
        } else {
            Some(previous as usize)
        }
    }
}

#[cfg(any(target_os = "macos", target_os = "ios"))]
#[link(name = "objc")]
extern "C" {
    fn objc_getClass(name: *const core::ffi::c_char) -> *mut core::ffi::c_void;
    fn sel_registerName(name: *const core::ffi::c_char) -> *mut core::ffi::c_void;
    fn class_getInstanceMethod(
        class: *mut core::ffi::c_void,
        selector: *mut core::ffi::c_void,
    ) -> *mut core::ffi::c_void;
    fn method_getImplementation(method: *mut core::ffi::c_void) -> *mut core::ffi::c_void;
    fn method_setImplementation(
        method: *mut core::ffi::c_void,
        implementation: *mut core::ffi::c_void,
    ) -> *mut core::ffi::c_void;
}
