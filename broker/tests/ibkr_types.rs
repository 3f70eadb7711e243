//! Order confirmation state machine and helpers, driven by the mock gateway.

use std::time::Duration;

use stratbook::Conid;
use stratbook_broker::ibkr::orders::rate_limit_delay;
use stratbook_broker::ibkr::{
    ConfirmPolicy, OrderStatus, cancel_all_orders, filter_live_orders, place_and_confirm,
};
use stratbook_broker::mock::{FillMode, GatewayCall, MOCK_ACCOUNT, MockGateway};
use stratbook_broker::{Gateway, OrderReply};

fn fast() -> ConfirmPolicy {
    ConfirmPolicy {
        max_confirmations: 3,
        call_delay: Duration::ZERO,
    }
}

fn prompt(id: &str) -> OrderReply {
    OrderReply::Prompt {
        id: id.into(),
        messages: vec!["confirm?".into()],
    }
}

// ============================================================================
// place_and_confirm
// ============================================================================

#[test]
fn immediate_acceptance() {
    let gw = MockGateway::builder().build();
    let exec = place_and_confirm(&gw, MOCK_ACCOUNT, Conid(265598), 800, &fast());

    assert_eq!(exec.status, OrderStatus::Confirmed);
    assert_eq!(exec.confirmations, 0);
    assert_eq!(exec.order_id.as_deref(), Some("1"));
    assert_eq!(exec.history, vec![OrderStatus::Submitted, OrderStatus::Confirmed]);
    assert_eq!(
        gw.placed_orders(),
        vec![GatewayCall::PlaceOrder {
            account: MOCK_ACCOUNT.into(),
            conid: 265598,
            quantity: 800,
            side: "BUY".into(),
        }]
    );
}

#[test]
fn prompt_prompt_terminal_confirms() {
    let gw = MockGateway::builder().fill_mode(FillMode::Prompts(2)).build();
    let exec = place_and_confirm(&gw, MOCK_ACCOUNT, Conid(8314), -100, &fast());

    assert_eq!(exec.status, OrderStatus::Confirmed);
    assert_eq!(exec.confirmations, 2);
    assert_eq!(
        exec.history,
        vec![
            OrderStatus::Submitted,
            OrderStatus::AwaitingConfirmation,
            OrderStatus::AwaitingConfirmation,
            OrderStatus::Confirmed,
        ]
    );

    let replies: Vec<_> = gw
        .calls()
        .into_iter()
        .filter(|c| matches!(c, GatewayCall::Reply(_)))
        .collect();
    assert_eq!(
        replies,
        vec![
            GatewayCall::Reply("prompt-1".into()),
            GatewayCall::Reply("prompt-2".into())
        ]
    );
}

#[test]
fn third_reply_response_is_still_parsed() {
    let gw = MockGateway::builder().fill_mode(FillMode::Prompts(3)).build();
    let exec = place_and_confirm(&gw, MOCK_ACCOUNT, Conid(1), 5, &fast());
    assert_eq!(exec.status, OrderStatus::Confirmed);
    assert_eq!(exec.confirmations, 3);
}

#[test]
fn confirmation_bound_fails() {
    let gw = MockGateway::builder().fill_mode(FillMode::Prompts(10)).build();
    let exec = place_and_confirm(&gw, MOCK_ACCOUNT, Conid(1), 5, &fast());

    assert_eq!(exec.status, OrderStatus::Failed);
    assert_eq!(exec.confirmations, 3);
    assert!(
        exec.last_message
            .as_deref()
            .unwrap()
            .contains("maximum confirmations")
    );
    let reply_count = gw
        .calls()
        .iter()
        .filter(|c| matches!(c, GatewayCall::Reply(_)))
        .count();
    assert_eq!(reply_count, 3);
}

#[test]
fn rejection_keeps_broker_text() {
    let gw = MockGateway::builder()
        .script(vec![
            prompt("a"),
            OrderReply::Rejected("Order rejected: price exceeds limit".into()),
        ])
        .build();
    let exec = place_and_confirm(&gw, MOCK_ACCOUNT, Conid(1), 5, &fast());

    assert_eq!(exec.status, OrderStatus::Failed);
    assert_eq!(
        exec.last_message.as_deref(),
        Some("Order rejected: price exceeds limit")
    );
    assert_eq!(exec.history.last(), Some(&OrderStatus::Failed));
    assert!(exec.status.is_terminal());
}

#[test]
fn unexpected_reply_fails() {
    let gw = MockGateway::builder()
        .script(vec![OrderReply::Unexpected("{}".into())])
        .build();
    let exec = place_and_confirm(&gw, MOCK_ACCOUNT, Conid(1), 5, &fast());
    assert_eq!(exec.status, OrderStatus::Failed);
}

#[test]
fn zero_quantity_never_submits() {
    let gw = MockGateway::builder().build();
    let exec = place_and_confirm(&gw, MOCK_ACCOUNT, Conid(1), 0, &fast());

    assert_eq!(exec.status, OrderStatus::Failed);
    assert!(gw.placed_orders().is_empty());
}

#[test]
fn sell_side_from_negative_quantity() {
    let gw = MockGateway::builder().build();
    place_and_confirm(&gw, MOCK_ACCOUNT, Conid(7), -42, &fast());
    match &gw.placed_orders()[0] {
        GatewayCall::PlaceOrder { side, quantity, .. } => {
            assert_eq!(side, "SELL");
            assert_eq!(*quantity, 42);
        }
        other => panic!("unexpected call {other:?}"),
    }
}

// ============================================================================
// Live orders and cancellation
// ============================================================================

#[test]
fn filter_defaults_to_live_statuses() {
    let gw = MockGateway::builder()
        .with_live_order(1, "AAPL", "Submitted")
        .with_live_order(2, "MSFT", "Filled")
        .with_live_order(3, "IBM", "PreSubmitted")
        .with_live_order(4, "NVDA", "Cancelled")
        .build();
    let all = gw.live_orders().unwrap();

    let live = filter_live_orders(all.clone(), &[]);
    let ids: Vec<i64> = live.iter().map(|o| o.order_id).collect();
    assert_eq!(ids, vec![1, 3]);

    let filled = filter_live_orders(all, &["Filled"]);
    assert_eq!(filled.len(), 1);
    assert_eq!(filled[0].order_id, 2);
}

#[test]
fn cancel_all_hits_each_order() {
    let gw = MockGateway::builder()
        .with_live_order(1, "AAPL", "Submitted")
        .with_live_order(3, "IBM", "PreSubmitted")
        .build();
    let live = filter_live_orders(gw.live_orders().unwrap(), &[]);

    let outcomes = cancel_all_orders(&gw, MOCK_ACCOUNT, &live, Duration::ZERO);
    assert_eq!(outcomes.len(), 2);
    assert!(outcomes.iter().all(|o| o.result.is_ok()));
    assert!(gw.calls().contains(&GatewayCall::CancelOrder("3".into())));
}

// ============================================================================
// rate_limit_delay
// ============================================================================

#[test]
fn rate_limit_zero_returns_immediately() {
    let start = std::time::Instant::now();
    rate_limit_delay(Duration::ZERO);
    assert!(start.elapsed().as_millis() < 50);
}

#[test]
fn rate_limit_nonzero_sleeps() {
    let start = std::time::Instant::now();
    rate_limit_delay(Duration::from_millis(100));
    assert!(start.elapsed().as_millis() >= 90);
}
