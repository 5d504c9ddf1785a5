//! The `drillcheck review` command.

use std::path::PathBuf;

use anyhow::Result;
use chrono::Utc;
use comfy_table::{Cell, Table};

use drillcheck_core::review::{JsonFileStore, ReviewScheduler};

pub fn execute(store: PathBuf, all: bool, clear: bool) -> Result<()> {
    let scheduler = ReviewScheduler::new(JsonFileStore::new(store));

    if clear {
        scheduler.clear();
        println!("Review schedule cleared.");
        return Ok(());
    }

    let now = Utc::now();
    let items = if all {
        let mut items = scheduler.items();
        items.sort_by_key(|i| i.next_due);
        items
    } else {
        scheduler.due_terms(now)
    };

    if items.is_empty() {
        println!("Nothing due for review.");
        return Ok(());
    }

    let mut table = Table::new();
    table.set_header(vec!["Term", "Reviews", "Last seen", "Due"]);
    for item in &items {
        let due = if item.next_due <= now {
            "now".to_string()
        } else {
            item.next_due.format("%Y-%m-%d %H:%M").to_string()
        };
        table.add_row(vec![
            Cell::new(&item.term),
            Cell::new(item.reviews),
            Cell::new(item.last_seen.format("%Y-%m-%d %H:%M")),
            Cell::new(due),
        ]);
    }
    println!("{table}");
    Ok(())
}
