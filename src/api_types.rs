//! Request and response bodies of the HTTP contract
use crate::error::TradeError;
use crate::identity::{ReliabilityTier, User};
use crate::registry::Book;
use crate::service::TradeRole;
use crate::trade::AcceptanceDecision;
use crate::types::{BookId, TradeType, UserId};
use serde::{Deserialize, Serialize};

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct CreateTradeRequest {
    pub requested_book: BookId,
    #[serde(default)]
    pub offered_book: Option<BookId>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct AcceptTradeRequest {
    pub trade_type: TradeType,
    #[serde(default)]
    pub recipient_offered_book: Option<BookId>,
}

impl AcceptTradeRequest {
    pub fn into_decision(self) -> Result<AcceptanceDecision, TradeError> {
        AcceptanceDecision::from_request(self.trade_type, self.recipient_offered_book)
    }
}

#[derive(Deserialize, Debug, Default)]
pub struct TradeQuery {
    pub role: Option<TradeRole>,
}

#[derive(Serialize, Debug)]
pub struct ErrorBody {
    pub code: &'static str,
    pub msg: String,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: UserId,
    pub display_name: String,
    pub reliability_tier: ReliabilityTier,
    pub completed_trades: u32,
}

impl From<User> for UserProfile {
    fn from(user: User) -> Self {
        Self {
            reliability_tier: user.reliability_tier(),
            id: user.id,
            display_name: user.display_name,
            completed_trades: user.completed_trades,
        }
    }
}

/// A book as the presentation layer lists it
#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct BookView {
    #[serde(flatten)]
    pub book: Book,
    /// False while an active trade holds the book, whatever the stored flag says
    pub listed: bool,
}

#[derive(Serialize, Debug)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: &'static str,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accept_body_maps_to_decision() {
        let body: AcceptTradeRequest =
            serde_json::from_str(r#"{"tradeType":"swap","recipientOfferedBook":"book_3"}"#)
                .unwrap();
        assert_eq!(
            body.into_decision().unwrap(),
            AcceptanceDecision::Swap {
                counter_offer: BookId::from("book_3")
            }
        );

        let body: AcceptTradeRequest =
            serde_json::from_str(r#"{"tradeType":"donation","recipientOfferedBook":null}"#)
                .unwrap();
        assert_eq!(body.into_decision().unwrap(), AcceptanceDecision::Donation);

        let body: AcceptTradeRequest = serde_json::from_str(
            r#"{"tradeType":"donation","recipientOfferedBook":"book_3"}"#,
        )
        .unwrap();
        assert!(matches!(
            body.into_decision(),
            Err(TradeError::InvalidRequest(_))
        ));
    }

    #[test]
    fn unknown_trade_type_is_rejected() {
        let body = serde_json::from_str::<AcceptTradeRequest>(r#"{"tradeType":"gift"}"#);
        assert!(body.is_err());
    }

    #[test]
    fn profile_carries_tier() {
        let user = User {
            id: UserId::from("user_a"),
            display_name: "Ada".into(),
            completed_trades: 6,
        };
        let json = serde_json::to_value(UserProfile::from(user)).unwrap();
        assert_eq!(json["reliabilityTier"], "VeryReliable");
        assert_eq!(json["displayName"], "Ada");
    }
}
