use chrono::Utc;
use proptest::prelude::*;
use rust_decimal::Decimal;
use std::sync::{Arc, Mutex};
use tokio::time::{sleep, Duration};
use trading_core::core::sync_handler;
use trading_core::supervisor::SupervisorConfig;
use trading_core::{
    AccountSnapshot, CoreConfig, Direction, EventPayload, EventType, MockGateway, OrderRequest,
    Price, RiskConfig, RiskLevel, Service, Symbol, TradingContext, Volume,
};

fn fast_config(risk: RiskConfig) -> CoreConfig {
    CoreConfig {
        risk,
        supervisor: SupervisorConfig {
            connect_attempts: 1,
            connect_backoff: Duration::from_millis(5),
            liveness_poll_interval: Duration::from_millis(5),
            liveness_timeout: Duration::from_millis(25),
        },
        ..Default::default()
    }
}

fn snapshot(balance: i64) -> AccountSnapshot {
    AccountSnapshot {
        balance: Decimal::from(balance),
        available: Decimal::from(balance),
        frozen: Decimal::ZERO,
        timestamp: Utc::now(),
    }
}

fn request(volume: &str) -> OrderRequest {
    OrderRequest::limit(
        "BTCUSDT",
        Direction::Long,
        Volume::from_str(volume).unwrap(),
        Price::from_str("100").unwrap(),
        "momentum_buy",
    )
}

async fn wait_until(check: impl Fn() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

/// Trades reach the risk service via the bus: the execution service
/// publishes the trade event, the risk service recomputes on it.
#[tokio::test]
async fn drawdown_over_the_bus_halts_trading() {
    let gateway = Arc::new(MockGateway::new());
    gateway.set_account(snapshot(100_000));
    let config = fast_config(RiskConfig {
        daily_loss_floor: Decimal::from(-20_000),
        ..Default::default()
    });
    let context = TradingContext::new(config, gateway.clone()).unwrap();
    context.start().await;
    context.account.on_account(snapshot(100_000));

    // Watch for the published risk alert
    let alerts = Arc::new(Mutex::new(Vec::new()));
    let sink = alerts.clone();
    context
        .bus
        .register(
            EventType::Risk,
            "test.alerts",
            sync_handler(move |event| {
                if let EventPayload::Risk(alert) = &event.payload {
                    sink.lock().unwrap().push(alert.level);
                }
            }),
        )
        .await;

    let order_id = context.execution.send_order(request("5")).await.unwrap();
    assert!(context.execution.order(&order_id).is_some());
    let order_ref = "mock-1";

    // First fill at a healthy balance anchors the day and the peak
    gateway.push_trade(trading_core::Trade {
        id: "t1".to_string(),
        order_id: order_ref.to_string(),
        symbol: "BTCUSDT".into(),
        direction: Direction::Long,
        volume: Volume::from_str("1").unwrap(),
        price: Price::from_str("100").unwrap(),
        timestamp: Utc::now(),
    });
    wait_until(|| context.bus.queue_depth() == 0).await;
    assert_eq!(context.risk.metrics().risk_level, RiskLevel::Low);

    // Balance collapses 30% and the daily loss hits the floor. The gateway
    // snapshot changes too, so trade-triggered resyncs agree.
    gateway.set_account(snapshot(70_000));
    context.account.on_account(snapshot(70_000));
    gateway.push_trade(trading_core::Trade {
        id: "t2".to_string(),
        order_id: order_ref.to_string(),
        symbol: "BTCUSDT".into(),
        direction: Direction::Long,
        volume: Volume::from_str("1").unwrap(),
        price: Price::from_str("100").unwrap(),
        timestamp: Utc::now(),
    });

    wait_until(|| context.risk.is_halted()).await;
    assert_eq!(context.risk.metrics().risk_level, RiskLevel::Critical);

    // The very next pre-trade check rejects
    assert!(context.execution.send_order(request("1")).await.is_none());

    // The level change was published as a risk event
    wait_until(|| !alerts.lock().unwrap().is_empty()).await;
    assert!(alerts.lock().unwrap().contains(&RiskLevel::Critical));

    context.stop().await;
}

#[tokio::test]
async fn resume_without_recovery_rehalts() {
    let gateway = Arc::new(MockGateway::new());
    let config = fast_config(RiskConfig {
        daily_loss_floor: Decimal::from(-20_000),
        ..Default::default()
    });
    let context = TradingContext::new(config, gateway.clone()).unwrap();
    context.start().await;

    context.account.on_account(snapshot(100_000));
    let trade = trading_core::Trade {
        id: "t1".to_string(),
        order_id: "unused".to_string(),
        symbol: "BTCUSDT".into(),
        direction: Direction::Long,
        volume: Volume::from_str("1").unwrap(),
        price: Price::from_str("100").unwrap(),
        timestamp: Utc::now(),
    };
    context.risk.on_trade(&trade);
    context.account.on_account(snapshot(70_000));
    context.risk.on_trade(&trade);
    assert!(context.risk.is_halted());

    context.risk.resume_trading();
    assert!(!context.risk.is_halted());
    assert!(context.risk.halt_reason().is_none());
    // The score survives the resume
    assert_eq!(context.risk.metrics().risk_level, RiskLevel::Critical);

    // Nothing recovered; the next trade re-halts
    context.risk.on_trade(&trade);
    assert!(context.risk.is_halted());

    context.stop().await;
}

proptest! {
    /// The volume-cap advisory never suggests more than the cap, and the
    /// position-limit advisory never suggests more than the remaining
    /// headroom.
    #[test]
    fn suggested_volumes_respect_limits(
        requested in 1u32..5_000,
        cap in 1u32..200,
        limit in 1u32..400,
        held in 0u32..400,
    ) {
        tokio_test::block_on(async {
            let gateway = Arc::new(MockGateway::new());
            let mut risk_config = RiskConfig {
                max_single_order_volume: Volume::new(Decimal::from(cap)),
                ..Default::default()
            };
            risk_config
                .position_limits
                .insert(Symbol::new("BTCUSDT"), Volume::new(Decimal::from(limit)));
            let context =
                TradingContext::new(fast_config(risk_config), gateway).unwrap();
            // Only the account cache runs; check_order is a pure query
            // against it
            context.account.start().await.unwrap();
            context.account.on_account(snapshot(100_000_000));
            if held > 0 {
                context.account.on_position(trading_core::Position {
                    symbol: "BTCUSDT".into(),
                    direction: Direction::Long,
                    volume: Volume::new(Decimal::from(held)),
                    avg_price: Price::from_str("100").unwrap(),
                    unrealized_pnl: Decimal::ZERO,
                });
            }

            let check = context
                .risk
                .check_order(&request(&requested.to_string()), None);
            if let Some(suggested) = check.suggested_volume {
                prop_assert!(suggested <= Volume::new(Decimal::from(cap)));
                prop_assert!(
                    suggested.value() + Decimal::from(held) <= Decimal::from(limit)
                        || suggested == Volume::new(Decimal::from(cap))
                );
            }
            if check.approved {
                prop_assert!(requested <= cap);
                prop_assert!(requested + held <= limit);
            }
            Ok(())
        })?;
    }
}
