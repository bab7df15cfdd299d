use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use trading_core::supervisor::SupervisorConfig;
use trading_core::{
    AccountSnapshot, ConnectivityOutcome, CoreConfig, Direction, Event, EventPayload,
    MockGateway, OperatingMode, Order, OrderKind, OrderStatus, Price, Signal, SignalKind,
    TickData, TradingContext, Volume,
};

fn fast_config() -> CoreConfig {
    CoreConfig {
        supervisor: SupervisorConfig {
            connect_attempts: 2,
            connect_backoff: Duration::from_millis(5),
            liveness_poll_interval: Duration::from_millis(5),
            liveness_timeout: Duration::from_millis(25),
        },
        ..Default::default()
    }
}

async fn started_context() -> (Arc<MockGateway>, TradingContext) {
    let gateway = Arc::new(MockGateway::new());
    gateway.set_account(AccountSnapshot {
        balance: Decimal::from(1_000_000),
        available: Decimal::from(1_000_000),
        frozen: Decimal::ZERO,
        timestamp: Utc::now(),
    });
    let context = TradingContext::new(fast_config(), gateway.clone()).unwrap();
    let mode = context.start().await;
    assert_eq!(mode, OperatingMode::Full);
    // Seed the account cache ahead of the first poll cycle
    context.account.on_account(AccountSnapshot {
        balance: Decimal::from(1_000_000),
        available: Decimal::from(1_000_000),
        frozen: Decimal::ZERO,
        timestamp: Utc::now(),
    });
    (gateway, context)
}

fn tick(symbol: &str, last: &str) -> TickData {
    TickData {
        symbol: symbol.into(),
        last_price: Price::from_str(last).unwrap(),
        bid_price: Price::from_str(last).unwrap(),
        ask_price: Price::from_str(last).unwrap(),
        volume: Volume::from_str("1").unwrap(),
        timestamp: Utc::now(),
    }
}

fn trade_signal(strategy: &str, volume: &str, price: Option<&str>) -> Signal {
    Signal {
        strategy_name: strategy.to_string(),
        symbol: "BTCUSDT".into(),
        direction: Direction::Long,
        action: "open".to_string(),
        volume: Volume::from_str(volume).unwrap(),
        price: price.map(|p| Price::from_str(p).unwrap()),
        kind: SignalKind::Trade,
        confidence: 0.8,
    }
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

#[tokio::test]
async fn signal_on_the_bus_becomes_a_gateway_order() {
    let (gateway, context) = started_context().await;

    context.bus.publish(Event::new(
        EventPayload::Signal(trade_signal("momentum", "2", Some("50000"))),
        "strategy",
    ));

    let probe = gateway.clone();
    wait_until(move || probe.sent_orders().len() == 1).await;

    let sent = gateway.sent_orders();
    assert_eq!(sent[0].kind, OrderKind::Limit);
    assert_eq!(sent[0].reference, "momentum_open");

    let active = context.execution.active_orders();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].strategy_tag, "momentum");
    assert_eq!(active[0].status, OrderStatus::Submitting);

    context.stop().await;
}

#[tokio::test]
async fn market_order_priced_from_tick_cache_for_margin() {
    let (gateway, context) = started_context().await;
    context.market_data.subscribe("BTCUSDT", "test").await.unwrap();
    gateway.push_tick(tick("BTCUSDT", "50000"));

    // Margin estimate from the cached tick: 90 * 50000 * 0.1 = 450k,
    // under the 800k budget (1M available * 0.8)
    let order_id = context
        .execution
        .send_order(trading_core::OrderRequest::market(
            "BTCUSDT",
            Direction::Long,
            Volume::from_str("90").unwrap(),
            "manual_buy",
        ))
        .await
        .unwrap();
    assert!(context.execution.order(&order_id).is_some());

    // After the price moves, the same request trips the margin rule even
    // though it carries no price of its own: 90 * 500000 * 0.1 = 4.5M
    gateway.push_tick(tick("BTCUSDT", "500000"));
    let rejected = context
        .execution
        .send_order(trading_core::OrderRequest::market(
            "BTCUSDT",
            Direction::Long,
            Volume::from_str("90").unwrap(),
            "manual_buy",
        ))
        .await;
    assert!(rejected.is_none());

    context.stop().await;
}

#[tokio::test]
async fn fills_flow_back_through_orders_and_trades() {
    let (gateway, context) = started_context().await;

    let order_id = context
        .execution
        .process_signal(trade_signal("momentum", "5", Some("50000")))
        .await
        .unwrap();

    // The gateway acknowledges, partially fills, then completes the order
    gateway.push_order(Order {
        id: "mock-1".to_string(),
        symbol: "BTCUSDT".into(),
        direction: Direction::Long,
        kind: OrderKind::Limit,
        volume: Volume::from_str("5").unwrap(),
        traded: Volume::zero(),
        price: Price::from_str("50000").unwrap(),
        status: OrderStatus::NotTraded,
        strategy_tag: String::new(),
        created_at: Utc::now(),
        updated_at: Utc::now(),
    });
    gateway.push_trade(trading_core::Trade {
        id: "t1".to_string(),
        order_id: "mock-1".to_string(),
        symbol: "BTCUSDT".into(),
        direction: Direction::Long,
        volume: Volume::from_str("2").unwrap(),
        price: Price::from_str("50000").unwrap(),
        timestamp: Utc::now(),
    });

    let order = context.execution.order(&order_id).unwrap();
    assert_eq!(order.status, OrderStatus::NotTraded);
    assert_eq!(order.traded, Volume::from_str("2").unwrap());

    // The account cache saw the same fill from its own gateway handler
    wait_until(|| context.account.snapshot().trades.len() == 1).await;

    let stats = context.execution.stats();
    assert_eq!(stats.orders_sent, 1);
    assert_eq!(stats.trades_received, 1);

    context.stop().await;
}

#[tokio::test]
async fn cancel_lifecycle_is_asynchronous() {
    let (gateway, context) = started_context().await;
    let order_id = context
        .execution
        .process_signal(trade_signal("momentum", "5", Some("50000")))
        .await
        .unwrap();

    assert!(context.execution.cancel_order(&order_id).await);
    assert_eq!(gateway.cancel_calls(), vec!["mock-1"]);
    // Still active until the gateway reports back
    assert!(context.execution.order(&order_id).unwrap().is_active());

    gateway.push_order(Order {
        id: "mock-1".to_string(),
        symbol: "BTCUSDT".into(),
        direction: Direction::Long,
        kind: OrderKind::Limit,
        volume: Volume::from_str("5").unwrap(),
        traded: Volume::zero(),
        price: Price::from_str("50000").unwrap(),
        status: OrderStatus::Cancelled,
        strategy_tag: String::new(),
        created_at: Utc::now(),
        updated_at: Utc::now(),
    });
    assert_eq!(
        context.execution.order(&order_id).unwrap().status,
        OrderStatus::Cancelled
    );

    // A second cancel fails locally without touching the gateway again
    assert!(!context.execution.cancel_order(&order_id).await);
    assert_eq!(gateway.cancel_calls().len(), 1);

    context.stop().await;
}

#[tokio::test]
async fn risk_cancel_all_signal_sweeps_symbol() {
    let (gateway, context) = started_context().await;
    context
        .execution
        .process_signal(trade_signal("momentum", "2", Some("50000")))
        .await
        .unwrap();
    context
        .execution
        .process_signal(trade_signal("breakout", "3", Some("50000")))
        .await
        .unwrap();

    context.bus.publish(Event::new(
        EventPayload::Signal(Signal {
            kind: SignalKind::Risk,
            action: "cancel_all".to_string(),
            ..trade_signal("risk_watch", "1", None)
        }),
        "strategy",
    ));

    let probe = gateway.clone();
    wait_until(move || probe.cancel_calls().len() == 2).await;

    context.stop().await;
}

#[tokio::test]
async fn degraded_gateway_still_reports_status() {
    let gateway = Arc::new(MockGateway::new());
    gateway.set_connect_failures(10);
    let context = TradingContext::new(fast_config(), gateway).unwrap();

    context.start().await;
    assert_eq!(
        context.supervisor.connectivity(),
        ConnectivityOutcome::Failed
    );

    let response = context.status();
    assert!(response.success);
    let report = response.data.unwrap();
    assert_eq!(report.connectivity, ConnectivityOutcome::Failed);
    assert_eq!(report.services.len(), 4);

    context.stop().await;
}

#[tokio::test]
async fn tick_cache_round_trip() {
    let (gateway, context) = started_context().await;

    context.market_data.subscribe("BTCUSDT", "s1").await.unwrap();
    context.market_data.subscribe("BTCUSDT", "s2").await.unwrap();
    assert_eq!(gateway.subscribe_calls(), vec!["BTCUSDT"]);

    gateway.push_tick(tick("BTCUSDT", "50000"));
    assert_eq!(
        context.market_data.get_latest("BTCUSDT").unwrap().last_price,
        Price::from_str("50000").unwrap()
    );

    context.market_data.unsubscribe("BTCUSDT", "s1").await.unwrap();
    assert!(gateway.unsubscribe_calls().is_empty());
    context.market_data.unsubscribe("BTCUSDT", "s2").await.unwrap();
    assert_eq!(gateway.unsubscribe_calls(), vec!["BTCUSDT"]);
    assert!(context.market_data.get_latest("BTCUSDT").is_none());

    context.stop().await;
}
