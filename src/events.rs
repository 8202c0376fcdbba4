use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::info;
use uuid::Uuid;

/// Domain events emitted by the services after a successful commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    // Batch events
    BatchCreated {
        batch_id: Uuid,
        batch_ref: String,
        group_id: Uuid,
    },
    BatchCompleted {
        batch_ref: String,
    },
    BatchReopened {
        batch_ref: String,
    },
    BatchConverted {
        batch_ref: String,
        paying_site_id: Uuid,
    },

    // Usage events
    UsageRecorded {
        usage_site_id: Uuid,
        batch_refs: Vec<String>,
        total_quantity: Decimal,
        total_cost: Decimal,
        cross_site: bool,
    },
    UsageDeleted {
        usage_id: Uuid,
        batch_ref: String,
        quantity: Decimal,
    },

    // Settlement events
    SettlementProcessed {
        settlement_code: String,
        debtor_site_id: Uuid,
        creditor_site_id: Uuid,
        amount: Decimal,
        savings: Decimal,
    },
    SettlementCancelled {
        settlement_code: String,
        records_reverted: u64,
    },

    // Expense events
    ExpenseCreated {
        expense_id: Uuid,
        site_id: Uuid,
        amount: Decimal,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }
}

/// Background task that drains the event channel and logs each event.
/// Downstream consumers (webhooks, reporting) would hang off this loop.
pub async fn process_events(mut receiver: mpsc::Receiver<Event>) {
    while let Some(event) = receiver.recv().await {
        match &event {
            Event::SettlementProcessed {
                settlement_code,
                amount,
                savings,
                ..
            } => {
                info!(
                    settlement_code = %settlement_code,
                    amount = %amount,
                    savings = %savings,
                    "settlement processed"
                );
            }
            Event::BatchCompleted { batch_ref } => {
                info!(batch_ref = %batch_ref, "batch fully consumed");
            }
            other => {
                info!(event = ?other, "domain event");
            }
        }
    }
    info!("Event channel closed; event processor shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn send_delivers_event() {
        let (tx, mut rx) = mpsc::channel(4);
        let sender = EventSender::new(tx);
        sender
            .send(Event::BatchCompleted {
                batch_ref: "BATCH-001".into(),
            })
            .await
            .unwrap();

        match rx.recv().await {
            Some(Event::BatchCompleted { batch_ref }) => assert_eq!(batch_ref, "BATCH-001"),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn send_fails_when_receiver_dropped() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sender = EventSender::new(tx);
        let result = sender
            .send(Event::UsageDeleted {
                usage_id: Uuid::new_v4(),
                batch_ref: "BATCH-002".into(),
                quantity: dec!(5),
            })
            .await;
        assert!(result.is_err());
    }
}
