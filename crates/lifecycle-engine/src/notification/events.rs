use chrono::{DateTime, Utc};

use crate::domain::{
    Classification, CustomerId, CustomerStatus, NotificationEvent, NotificationKind,
    NotificationPriority, UserId,
};

/// Events for the differences between the stored and the new classification.
///
/// Status events are only raised between two classified states, so first
/// classification and a fall back to "unclassified" stay silent.
pub fn change_events(
    customer_id: CustomerId,
    previous: &Classification,
    next: &Classification,
    recipient: UserId,
    now: DateTime<Utc>,
) -> Vec<NotificationEvent> {
    let mut events = Vec::new();

    if let (Some(from), Some(to)) = (previous.status, next.status) {
        if from != to {
            let priority = if to == CustomerStatus::Dormant {
                NotificationPriority::High
            } else {
                NotificationPriority::Normal
            };

            events.push(NotificationEvent {
                kind: NotificationKind::StatusChanged,
                priority,
                target_user_id: recipient,
                related_entity_id: customer_id,
                title: format!("Customer status changed to {}", to),
                message: format!(
                    "Customer #{} moved from {} to {}.",
                    customer_id, from, to
                ),
                created_at: now,
            });
        }
    }

    if previous.tier != next.tier {
        let (priority, direction) = if next.tier > previous.tier {
            (NotificationPriority::High, "upgraded")
        } else {
            (NotificationPriority::Normal, "downgraded")
        };

        events.push(NotificationEvent {
            kind: NotificationKind::TierChanged,
            priority,
            target_user_id: recipient,
            related_entity_id: customer_id,
            title: format!("Membership {} to {}", direction, next.tier),
            message: format!(
                "Customer #{} membership {} from {} to {}.",
                customer_id, direction, previous.tier, next.tier
            ),
            created_at: now,
        });
    }

    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::MembershipTier;

    fn classification(status: Option<CustomerStatus>, tier: MembershipTier) -> Classification {
        Classification { status, tier }
    }

    #[test]
    fn test_no_events_when_unchanged() {
        let same = classification(Some(CustomerStatus::Active), MembershipTier::Gold);
        assert!(change_events(1, &same, &same, 7, Utc::now()).is_empty());
    }

    #[test]
    fn test_status_and_tier_change_emit_two_events() {
        let before = classification(Some(CustomerStatus::Active), MembershipTier::Silver);
        let after = classification(Some(CustomerStatus::Dormant), MembershipTier::Bronze);

        let events = change_events(5, &before, &after, 7, Utc::now());

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, NotificationKind::StatusChanged);
        assert_eq!(events[0].priority, NotificationPriority::High);
        assert_eq!(events[0].related_entity_id, 5);
        assert_eq!(events[1].kind, NotificationKind::TierChanged);
        assert_eq!(events[1].priority, NotificationPriority::Normal);
        assert!(events[1].title.contains("downgraded"));
    }

    #[test]
    fn test_first_classification_is_silent() {
        let before = classification(None, MembershipTier::Bronze);
        let after = classification(Some(CustomerStatus::Active), MembershipTier::Bronze);
        assert!(change_events(1, &before, &after, 7, Utc::now()).is_empty());
    }

    #[test]
    fn test_upgrade_is_high_priority() {
        let before = classification(None, MembershipTier::Silver);
        let after = classification(None, MembershipTier::Platinum);
        let events = change_events(1, &before, &after, 7, Utc::now());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].priority, NotificationPriority::High);
        assert_eq!(events[0].target_user_id, 7);
    }
}
