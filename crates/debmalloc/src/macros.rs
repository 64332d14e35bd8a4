/// Name of the enclosing function, without its module path.
///
/// Closures report the function they are defined in.
#[macro_export]
macro_rules! function_name {
    () => {{
        fn f() {}
        fn type_name_of<T>(_: T) -> &'static str {
            ::core::any::type_name::<T>()
        }
        let name = type_name_of(f);
        let name = &name[..name.len() - 3];
        match name.rsplit("::").find(|part| *part != "{{closure}}") {
            Some(part) => part,
            None => name,
        }
    }};
}

/// The [`Site`](crate::Site) of the invocation.
#[macro_export]
macro_rules! site {
    () => {
        $crate::Site::new(file!(), line!(), $crate::function_name!())
    };
}

/// Declares the activation of the enclosing scope for the call macros.
///
/// `priority!(n)` traces at priority `n`, `priority!()` at
/// [`DEFAULT_PRIORITY`](crate::DEFAULT_PRIORITY), `priority!(off)` disables
/// tracing.
#[macro_export]
macro_rules! priority {
    (off) => {
        #[allow(dead_code)]
        const DEBMALLOC_PRIORITY: $crate::Activation = $crate::Activation::Off;
    };
    () => {
        $crate::priority!($crate::DEFAULT_PRIORITY);
    };
    ($priority:expr) => {
        #[allow(dead_code)]
        const DEBMALLOC_PRIORITY: $crate::Activation = $crate::Activation::On($priority);
    };
}

/// Emits a record at `priority` from the invocation site.
#[macro_export]
macro_rules! debmalloc_log {
    ($priority:expr, $($arg:tt)+) => {
        $crate::emit(
            $priority,
            file!(),
            line!(),
            $crate::function_name!(),
            format_args!($($arg)+),
        )
    };
}

#[macro_export]
macro_rules! malloc {
    ($size:expr) => {
        DEBMALLOC_PRIORITY.malloc($size, $crate::site!())
    };
}

#[macro_export]
macro_rules! calloc {
    ($count:expr, $size:expr) => {
        DEBMALLOC_PRIORITY.calloc($count, $size, $crate::site!())
    };
}

#[macro_export]
macro_rules! realloc {
    ($ptr:expr, $size:expr) => {
        DEBMALLOC_PRIORITY.realloc(($ptr) as *mut $crate::c_void, $size, $crate::site!())
    };
}

#[macro_export]
macro_rules! free {
    ($ptr:expr) => {
        DEBMALLOC_PRIORITY.free(($ptr) as *mut $crate::c_void, $crate::site!())
    };
}

#[macro_export]
macro_rules! strdup {
    ($s:expr) => {
        DEBMALLOC_PRIORITY.strdup($s, $crate::site!())
    };
}

#[macro_export]
macro_rules! strndup {
    ($s:expr, $n:expr) => {
        DEBMALLOC_PRIORITY.strndup($s, $n, $crate::site!())
    };
}
