use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! uuid_newtype {
    ($name:ident) => {
        /// Identificador usando NewType Pattern sobre `Uuid`.
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type,
        )]
        #[sqlx(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }

            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }
    };
}

uuid_newtype!(UserId);
uuid_newtype!(AccountId);
uuid_newtype!(TransactionId);
uuid_newtype!(CorrelationId);
uuid_newtype!(PaymentId);
uuid_newtype!(EventId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_matches_inner_uuid() {
        let raw = Uuid::new_v4();
        let id = AccountId::from(raw);
        assert_eq!(id.to_string(), raw.to_string());
    }

    #[test]
    fn new_ids_are_unique() {
        assert_ne!(TransactionId::new(), TransactionId::new());
    }
}
