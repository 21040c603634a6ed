// Colored terminal output: stream banners, frame labels, exit summary.
//
// Records themselves are printed uncolored so stdout stays valid JSON when
// piped. Everything else here is decoration for a human watching the stream.

use colored::Colorize;

use crate::stats::Counters;

fn now() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

pub fn dialing(url: &str) {
    println!("{} {}", "dialing:".dimmed(), url);
}

pub fn stream_started() {
    println!("{} {}", "Stream Started".green().bold(), now());
}

pub fn stream_exited() {
    println!("{} {}", "Stream Exited".yellow().bold(), now());
}

/// A rendered output record.
pub fn print_record(rendered: &str) {
    println!("{rendered}");
}

/// A non-commit frame: its label, then its body as JSON.
pub fn print_frame(label: &str, json: &str) {
    println!("{}", label.cyan().bold());
    println!("{json}");
}

/// Final counter table.
pub fn display_summary(counters: &Counters) {
    let rows = counters.summary();
    let elapsed = counters.elapsed_secs();

    println!(
        "\n{}",
        format!("=== Stream Summary ({elapsed:.1}s) ===").bold()
    );
    if rows.is_empty() {
        println!("  {}", "No messages received.".dimmed());
        return;
    }
    for (name, total) in rows {
        let rate = if elapsed > 0.0 {
            total as f64 / elapsed
        } else {
            0.0
        };
        println!(
            "  {:<20} {:>10}  {}",
            name,
            total,
            format!("({rate:.2}/s)").dimmed()
        );
    }
}
