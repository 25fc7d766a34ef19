//! Check command implementation

use std::collections::BTreeSet;

use anyhow::{bail, Result};
use tracing::info;

use terminal_oms::oms::OrderTags;
use terminal_oms::types::OrderId;

use super::session::{Session, Step};

pub fn run(session_path: String) -> Result<()> {
    let session = Session::from_file(&session_path)?;
    info!("Checking session {}", session_path);

    println!("\n{}", "=".repeat(60));
    println!("SNAPSHOT");
    println!("{}", "=".repeat(60));

    let mut tickets = BTreeSet::new();
    let mut tagged: Vec<OrderId> = Vec::new();
    let mut collect = |tags: &OrderTags| {
        tagged.extend([tags.reference, tags.stop_loss, tags.take_profit].into_iter().flatten());
    };

    for p in &session.positions {
        println!(
            "  position {:<8} {:<10} {:?} {:>8.4} @ {:.5} sl {:.5} tp {:.5}  [{}]",
            p.id, p.symbol, p.position_type, p.volume, p.open, p.stoploss, p.takeprofit, p.comment
        );
        if !tickets.insert(p.id) {
            bail!("Duplicate ticket {} in snapshot", p.id);
        }
        collect(&p.comment);
    }
    for o in &session.orders {
        println!(
            "  order    {:<8} {:<10} {:?} {:?} {:>8.4} @ {:.5}  [{}]",
            o.id, o.symbol, o.order_type, o.state, o.volume, o.open, o.comment
        );
        if !tickets.insert(o.id) {
            bail!("Duplicate ticket {} in snapshot", o.id);
        }
        collect(&o.comment);
    }

    let mut seen = BTreeSet::new();
    let collisions: Vec<_> = tagged.iter().filter(|id| !seen.insert(**id)).collect();
    if !collisions.is_empty() {
        println!("\n  Tag ids used more than once (will be aliased): {:?}", collisions);
    }

    let counts = session.steps.iter().fold([0usize; 4], |mut acc, step| {
        match step {
            Step::Buy(_) | Step::Sell(_) => acc[0] += 1,
            Step::Cancel { .. } => acc[1] += 1,
            Step::Event(_) => acc[2] += 1,
            Step::Tick(_) | Step::Reconnect => acc[3] += 1,
        }
        acc
    });

    println!("\n{}", "=".repeat(60));
    println!("STEPS");
    println!("{}", "=".repeat(60));
    println!("  Orders:       {}", counts[0]);
    println!("  Cancels:      {}", counts[1]);
    println!("  Transactions: {}", counts[2]);
    println!("  Other:        {}", counts[3]);
    Ok(())
}
