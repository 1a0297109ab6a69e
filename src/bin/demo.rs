//! demo — simulated CPU workload.
//!
//! Prints one `Demo <i>/<n>` line per second of "work", flushing after each
//! line so a pipe reader sees exactly one line per unit.

use std::io::Write;
use std::thread;
use std::time::Duration;

fn main() {
    let args: Vec<String> = std::env::args().collect();
    let Some(n) = args.get(1).and_then(|s| s.parse::<u32>().ok()) else {
        eprintln!(
            "Usage: {} <n>",
            args.first().map(String::as_str).unwrap_or("demo")
        );
        std::process::exit(1);
    };

    let mut out = std::io::stdout();
    for i in 0..n {
        let _ = writeln!(out, "Demo {i}/{n}");
        let _ = out.flush();
        thread::sleep(Duration::from_secs(1));
    }
}
