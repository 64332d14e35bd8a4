use std::{ffi::CStr, ptr, slice};

use debmalloc::{capture::capture, Bound, Instrumented, Libc, RealAlloc, Site, TraceRecord};
use libc::c_void;

const MESSAGE: &CStr = c"Hello, World!";

debmalloc::priority!(7);

fn messages(records: &[TraceRecord]) -> Vec<&str> {
    records.iter().map(|r| r.message.as_str()).collect()
}

#[test]
fn malloc_emits_request_and_result() {
    let line = line!() + 1;
    let (ptr, records) = capture(|| unsafe { debmalloc::malloc!(1024) });

    assert!(!ptr.is_null());
    assert_eq!(
        messages(&records),
        ["malloc(1024)".to_string(), format!("malloc(1024) = {:p}", ptr)]
    );

    for record in &records {
        assert_eq!(record.priority, 7);
        assert_eq!(record.line, line);
        assert_eq!(record.func, "malloc_emits_request_and_result");
        assert!(record.file.ends_with("interpose_test.rs"));
    }

    unsafe {
        ptr::write_bytes(ptr as *mut u8, 0xab, 1024);
        libc::free(ptr);
    }
}

#[test]
fn calloc_returns_zeroed_memory() {
    let (ptr, records) = capture(|| unsafe { debmalloc::calloc!(3, 512) });

    assert!(!ptr.is_null());
    assert!(unsafe { slice::from_raw_parts(ptr as *const u8, 3 * 512) }
        .iter()
        .all(|b| *b == 0));
    assert_eq!(messages(&records)[0], "calloc(3, 512)");
    assert_eq!(messages(&records)[1], format!("calloc(3, 512) = {:p}", ptr));

    unsafe { libc::free(ptr) }
}

#[test]
fn calloc_overflow_is_reported_as_null() {
    let (ptr, records) = capture(|| unsafe { debmalloc::calloc!(usize::MAX, 2) });

    assert!(ptr.is_null());
    assert_eq!(
        messages(&records),
        [
            format!("calloc({}, 2)", usize::MAX),
            format!("calloc({}, 2) = 0x0", usize::MAX)
        ]
    );
}

#[test]
fn realloc_preserves_leading_bytes() {
    unsafe {
        let ptr = debmalloc::malloc!(16) as *mut u8;
        for i in 0..16 {
            ptr.add(i).write(i as u8);
        }

        let (grown, records) = capture(|| debmalloc::realloc!(ptr, 4096) as *mut u8);

        assert!(!grown.is_null());
        assert_eq!(
            slice::from_raw_parts(grown, 16),
            (0..16).collect::<Vec<u8>>().as_slice()
        );
        assert_eq!(
            messages(&records),
            [
                format!("realloc({:p}, 4096)", ptr),
                format!("realloc({:p}, 4096) = {:p}", ptr, grown)
            ]
        );

        let shrunk = debmalloc::realloc!(grown, 8) as *mut u8;
        assert_eq!(slice::from_raw_parts(shrunk, 8), &[0, 1, 2, 3, 4, 5, 6, 7]);

        debmalloc::free!(shrunk);
    }
}

#[test]
fn free_emits_two_records() {
    let ptr = unsafe { libc::malloc(64) };

    let ((), records) = capture(|| unsafe { debmalloc::free!(ptr) });

    assert_eq!(
        messages(&records),
        [format!("free({:p})", ptr), format!("free({:p}) = void", ptr)]
    );
}

#[test]
fn strdup_copies_the_string() {
    let (copy, records) = capture(|| unsafe { debmalloc::strdup!(MESSAGE.as_ptr()) });

    assert!(!copy.is_null());
    assert_ne!(copy as *const _, MESSAGE.as_ptr());
    assert_eq!(unsafe { CStr::from_ptr(copy) }, MESSAGE);
    assert_eq!(
        messages(&records),
        [
            "strdup(\"Hello, World!\")".to_string(),
            format!("strdup(\"Hello, World!\") = {:p}", copy)
        ]
    );

    unsafe { libc::free(copy as *mut c_void) }
}

#[test]
fn strndup_keeps_the_prefix() {
    let (copy, records) = capture(|| unsafe { debmalloc::strndup!(MESSAGE.as_ptr(), 3) });

    assert_eq!(unsafe { CStr::from_ptr(copy) }, c"Hel");
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].message, "strndup(\"Hel\", 3)");

    unsafe { libc::free(copy as *mut c_void) }
}

#[test]
fn activation_follows_lexical_scope() {
    let ((), records) = capture(|| unsafe {
        let before = libc::malloc(8);
        libc::free(before);

        let traced = debmalloc::malloc!(8);
        debmalloc::free!(traced);

        {
            debmalloc::priority!(off);

            let quiet = debmalloc::malloc!(8);
            let quiet = debmalloc::realloc!(quiet, 16);
            let copy = debmalloc::strdup!(MESSAGE.as_ptr());
            debmalloc::free!(copy);
            debmalloc::free!(quiet);
        }

        {
            debmalloc::priority!(2);

            let again = debmalloc::calloc!(2, 8);
            debmalloc::free!(again);
        }

        let last = debmalloc::malloc!(8);
        debmalloc::free!(last);
    });

    let priorities: Vec<_> = records.iter().map(|r| r.priority).collect();

    assert_eq!(priorities, [7, 7, 7, 7, 2, 2, 2, 2, 7, 7, 7, 7]);
}

#[test]
fn wrapped_results_match_the_real_routine() {
    let traced = Instrumented::new(Libc);
    let site = Site::new(file!(), line!(), "differential");

    let sizes = [0, 1, 17, 4096, 1 << 20, usize::MAX / 2, usize::MAX];

    let (_, records) = capture(|| {
        for size in sizes {
            unsafe {
                let plain = libc::malloc(size);
                let wrapped = traced.malloc(size, 5, &site);

                assert_eq!(plain.is_null(), wrapped.is_null(), "size {}", size);

                libc::free(plain);
                traced.free(wrapped, 5, &site);
            }
        }
    });

    assert_eq!(records.len(), sizes.len() * 4);
}

#[test]
fn bound_table_serves_allocations() {
    let first = debmalloc::bind().unwrap() as *const _;
    let second = debmalloc::bind().unwrap() as *const _;
    assert_eq!(first, second);
    assert!(debmalloc::bound().is_some());

    let traced = Instrumented::new(Bound);
    let site = debmalloc::site!();

    let (_, records) = capture(|| unsafe {
        let ptr = traced.calloc(4, 4, 1, &site) as *mut u32;
        assert_eq!(slice::from_raw_parts(ptr, 4), &[0, 0, 0, 0]);

        let copy = traced.strdup(MESSAGE.as_ptr(), 1, &site);
        assert_eq!(CStr::from_ptr(copy), MESSAGE);

        traced.free(copy as *mut c_void, 1, &site);
        traced.free(ptr as *mut c_void, 1, &site);
    });

    assert_eq!(records.len(), 8);
    assert!(records.iter().all(|r| r.func == "bound_table_serves_allocations"));
}

#[test]
fn log_macro_shares_the_sink() {
    let traced = Instrumented::new(Libc);
    let site = debmalloc::site!();

    let (ptr, records) = capture(|| unsafe {
        debmalloc::debmalloc_log!(5, "before {}", "malloc");
        traced.malloc(3, 5, &site)
    });

    assert_eq!(
        messages(&records),
        [
            "before malloc".to_string(),
            "malloc(3)".into(),
            format!("malloc(3) = {:p}", ptr)
        ]
    );

    unsafe { Libc.free(ptr) }
}
