use std::ffi::c_int;

extern "C" {
    /// Reentrancy counter of the current thread plus 1.
    fn debmalloc_reentrancy_add() -> c_int;

    /// Reentrancy counter of the current thread minus 1.
    fn debmalloc_reentrancy_sub() -> c_int;
}

/// Reentrancy guard.
///
/// Holding one marks the current thread as inside a traced call, so
/// allocations made by a sink while it renders a record are passed straight
/// to the real routine instead of being traced again.
pub(crate) struct Reentrancy(c_int);

impl Reentrancy {
    /// Create new reentrancy guard.
    #[inline]
    pub(crate) fn new() -> Self {
        Self(unsafe { debmalloc_reentrancy_add() })
    }
}

impl Reentrancy {
    /// Return true if first enter the scope.
    #[inline]
    pub(crate) fn is_ok(&self) -> bool {
        self.0 == 1
    }
}

impl Drop for Reentrancy {
    #[inline]
    fn drop(&mut self) {
        unsafe {
            debmalloc_reentrancy_sub();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Reentrancy;

    #[test]
    fn nested_guard_is_not_ok() {
        let outer = Reentrancy::new();
        assert!(outer.is_ok());

        {
            let inner = Reentrancy::new();
            assert!(!inner.is_ok());
        }

        drop(outer);

        assert!(Reentrancy::new().is_ok());
    }
}
