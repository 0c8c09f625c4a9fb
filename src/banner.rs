//! Startup banner and shutdown summary display.

use crate::bridge::StatsSnapshot;
use crate::consts::{AUTHOR, HOMEPAGE, VERSION, format_number};

/// Server configuration for display in the startup banner.
pub struct BannerInfo<'a> {
    pub url: &'a str,
    pub skills: usize,
    pub batch_size: usize,
    pub rate_limit: u32,
    pub wait_timeout_secs: u64,
    pub journal: &'a str,
}

/// Print the startup banner with server info.
pub fn print_banner(info: &BannerInfo) {
    println!(
        r#"
   ╔═══════════════════════════════════════╗
   ║          S K I L L G A T E            ║
   ║   one thread acts, the rest just ask  ║
   ╚═══════════════════════════════════════╝

   version   {}
   by        {}
   home      {}
   url       {}
   skills    {}
   batch     {} per tick
   limit     {} per second
   wait      {}s
   journal   {}
"#,
        VERSION,
        AUTHOR,
        HOMEPAGE,
        info.url,
        info.skills,
        info.batch_size,
        format_number(u64::from(info.rate_limit)),
        info.wait_timeout_secs,
        info.journal,
    );
}

/// Print request totals on shutdown.
pub fn print_shutdown_summary(stats: StatsSnapshot) {
    if stats.received > 0 {
        println!(
            "served: {} received, {} processed, {} rate-limited, {} timed out, {} late",
            format_number(stats.received),
            format_number(stats.processed),
            format_number(stats.rate_limited),
            format_number(stats.timed_out),
            format_number(stats.late),
        );
    }
    println!("goodbye.");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn print_banner_does_not_panic() {
        let info = BannerInfo {
            url: "http://127.0.0.1:8090/",
            skills: 5,
            batch_size: 20,
            rate_limit: 100,
            wait_timeout_secs: 60,
            journal: "disabled",
        };
        print_banner(&info);
    }

    #[test]
    fn print_shutdown_summary_with_traffic() {
        let stats = StatsSnapshot {
            received: 1234,
            processed: 1200,
            timed_out: 34,
            ..StatsSnapshot::default()
        };
        print_shutdown_summary(stats);
    }

    #[test]
    fn print_shutdown_summary_idle() {
        // Only "goodbye." when nothing was served.
        print_shutdown_summary(StatsSnapshot::default());
    }
}
