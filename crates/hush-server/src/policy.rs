/// Operations subject to access policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create,
    GetInfo,
    Redeem,
    Delete,
    ListOwned,
}

/// Caller identity as supplied by the surrounding system. The core
/// never authenticates credentials; `owner_id` is opaque.
#[derive(Debug, Clone, Default)]
pub struct Caller {
    pub owner_id: Option<String>,
    pub display: Option<String>,
}

impl Caller {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn is_anonymous(&self) -> bool {
        self.owner_id.is_none()
    }
}

/// Pure allow/deny decision. `Delete` and `ListOwned` require an
/// authenticated caller owning the record; everything else is open.
pub fn allows(caller: &Caller, secret_owner: Option<&str>, op: Operation) -> bool {
    match op {
        Operation::Create | Operation::GetInfo | Operation::Redeem => true,
        Operation::ListOwned => caller.owner_id.is_some(),
        Operation::Delete => match (&caller.owner_id, secret_owner) {
            (Some(caller_id), Some(owner)) => caller_id == owner,
            _ => false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caller(id: &str) -> Caller {
        Caller {
            owner_id: Some(id.into()),
            display: None,
        }
    }

    #[test]
    fn open_operations_allow_anyone() {
        let anon = Caller::anonymous();
        assert!(allows(&anon, Some("alice"), Operation::Create));
        assert!(allows(&anon, Some("alice"), Operation::GetInfo));
        assert!(allows(&anon, Some("alice"), Operation::Redeem));
    }

    #[test]
    fn delete_requires_matching_owner() {
        assert!(allows(&caller("alice"), Some("alice"), Operation::Delete));
        assert!(!allows(&caller("bob"), Some("alice"), Operation::Delete));
        assert!(!allows(&Caller::anonymous(), Some("alice"), Operation::Delete));
        // Anonymous secrets have no owner and can never be deleted.
        assert!(!allows(&caller("alice"), None, Operation::Delete));
    }

    #[test]
    fn listing_requires_authentication() {
        assert!(allows(&caller("alice"), None, Operation::ListOwned));
        assert!(!allows(&Caller::anonymous(), None, Operation::ListOwned));
    }
}
