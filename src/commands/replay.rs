//! Replay command implementation

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};

use terminal_oms::broker::Broker;
use terminal_oms::oms::Notification;
use terminal_oms::terminal::PaperTerminal;
use terminal_oms::Config;

use super::session::{Session, Step};

pub fn run(session_path: String, config_path: Option<String>, settle_ms: u64) -> Result<()> {
    let config = match &config_path {
        Some(path) => {
            let config = Config::from_file(path)?;
            info!("Loaded configuration from: {}", path);
            config
        }
        None => {
            let mut config = Config::default();
            config.apply_env()?;
            config
        }
    };

    let session = Session::from_file(&session_path)?;
    info!(
        "Loaded session {} ({} positions, {} orders, {} steps)",
        session_path,
        session.positions.len(),
        session.orders.len(),
        session.steps.len()
    );

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(replay(config, session, Duration::from_millis(settle_ms)))
}

async fn replay(config: Config, session: Session, settle: Duration) -> Result<()> {
    let terminal = Arc::new(
        PaperTerminal::new(&config.paper)
            .with_positions(session.positions)
            .with_orders(session.orders),
    );
    if let Some(balance) = session.balance {
        terminal.set_balance(balance);
    }

    let mut broker = Broker::new(Arc::clone(&terminal), config.broker.clone());
    if let Some(report) = broker.start().await.context("Failed to start broker")? {
        println!("\n{}", "=".repeat(60));
        println!("RECONCILIATION");
        println!("{}", "=".repeat(60));
        println!("  Positions:    {}", report.positions);
        println!("  Orders:       {}", report.orders);
        println!("  Synthesized:  {:?}", report.synthesized);
        println!("  Missing:      {:?}", report.missing);
    }

    println!("\n{}", "=".repeat(60));
    println!("NOTIFICATIONS");
    println!("{}", "=".repeat(60));
    drain(&broker);

    for (index, step) in session.steps.into_iter().enumerate() {
        match step {
            Step::Buy(order) => match broker.buy(order.into()) {
                Ok(order) => info!(step = index, id = order.id, "Buy placed"),
                Err(e) => warn!(step = index, "Buy refused: {}", e),
            },
            Step::Sell(order) => match broker.sell(order.into()) {
                Ok(order) => info!(step = index, id = order.id, "Sell placed"),
                Err(e) => warn!(step = index, "Sell refused: {}", e),
            },
            Step::Cancel { id } => broker.cancel(id),
            Step::Event(event) => terminal.push_event(event),
            Step::Tick(tick) => terminal.push_tick(tick),
            Step::Reconnect => {
                let report = broker.reconnect().await.context("Reconnect failed")?;
                info!(
                    step = index,
                    refreshed = report.refreshed.len(),
                    synthesized = report.synthesized.len(),
                    "Reconnected"
                );
            }
        }

        // Give the workers a chance to run before the next step
        tokio::time::sleep(settle).await;
        broker.mark_boundary();
        drain(&broker);
    }

    terminal.close_streams();
    broker.stop().await;
    drain(&broker);

    let alerts = broker.take_alerts();
    if !alerts.is_empty() {
        println!("\n{}", "=".repeat(60));
        println!("ALERTS");
        println!("{}", "=".repeat(60));
        for alert in &alerts {
            println!("  {}", alert);
        }
    }

    println!("\n{}", "=".repeat(60));
    println!("POSITIONS");
    println!("{}", "=".repeat(60));
    for (symbol, position) in broker.open_positions() {
        println!("  {:<12} size {:>10.4} @ {:.5}", symbol, position.size, position.price);
    }
    println!("  Cash:  {:.2}", broker.cash());
    println!("  Value: {:.2}", broker.value());

    let requests = terminal.requests();
    println!("\n  Terminal requests: {}", requests.len());
    Ok(())
}

fn drain<T: terminal_oms::terminal::Terminal>(broker: &Broker<T>) {
    while let Some(notification) = broker.poll_notification() {
        match notification {
            Notification::Order(order) => println!(
                "  #{:<4} {:<10} {:?} {:?} {:<8} size {:>8.4} filled {:>8.4} @ {:.5}{}",
                order.id,
                order.status.to_string(),
                order.side,
                order.kind,
                order.symbol,
                order.size,
                order.executed.size,
                order.executed.price,
                if order.simulated { " (simulated)" } else { "" }
            ),
            Notification::Boundary => println!("  {}", "-".repeat(56)),
        }
    }
    while let Some(tick) = broker.poll_tick() {
        println!("  tick {} bid {:.5} ask {:.5}", tick.symbol, tick.bid, tick.ask);
    }
}
