//! Allocates through the call-site macros twice, once in a scope traced at
//! priority 7 and once in a scope that switches tracing off.
//!
//! ```text
//! debmalloc-demo 4096
//! debmalloc-demo --log        # RUST_LOG=debug to see priority 7
//! debmalloc-demo --json
//! ```

use clap::Parser;
use debmalloc::{Record, TraceRecord};

const MESSAGE: &std::ffi::CStr = c"Hello, World!";
const PART_MESSAGE: &std::ffi::CStr = c"Hel";

#[derive(Parser)]
#[command(name = "debmalloc-demo")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Size of the first allocation, in bytes
    #[arg(default_value_t = 8192)]
    size: usize,

    /// Route records to the `log` facade
    #[arg(long, conflicts_with = "json")]
    log: bool,

    /// Print records as JSON lines
    #[arg(long)]
    json: bool,
}

/// Defines `$name(size)`, the same sequence of calls under whatever
/// `DEBMALLOC_PRIORITY` the invoking module declares.
macro_rules! exercise {
    ($name:ident) => {
        pub fn $name(size: usize) {
            use std::ffi::CStr;

            eprintln!("Begin {}.", stringify!($name));

            unsafe {
                let p1 = debmalloc::malloc!(size);
                let p2 = debmalloc::realloc!(p1, size * 2);
                let p3 = debmalloc::calloc!(3, size);
                let p4 = debmalloc::strdup!(super::MESSAGE.as_ptr());
                let p5 = debmalloc::strndup!(super::MESSAGE.as_ptr(), 3);

                assert_eq!(CStr::from_ptr(p5), super::PART_MESSAGE);

                debmalloc::free!(p5);
                debmalloc::free!(p4);
                debmalloc::free!(p3);
                debmalloc::free!(p2);
            }

            eprintln!("End {}.", stringify!($name));
        }
    };
}

mod traced {
    debmalloc::priority!(7);

    exercise!(use_debmalloc);
}

mod untraced {
    debmalloc::priority!(off);

    exercise!(dont_use_debmalloc);
}

fn json_sink(record: &Record<'_>) {
    match serde_json::to_string(&TraceRecord::from(record)) {
        Ok(line) => eprintln!("{}", line),
        Err(err) => log::error!("serialize record: {}", err),
    }
}

fn main() {
    let cli = Cli::parse();

    if cli.log {
        pretty_env_logger::init();
        debmalloc::set_sink(debmalloc::log_sink);
    } else if cli.json {
        debmalloc::set_sink(json_sink);
    }

    traced::use_debmalloc(cli.size);
    untraced::dont_use_debmalloc(cli.size);
}
