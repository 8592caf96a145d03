use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use larder_core::{DomainError, MenuItemId};

/// A sellable menu item as seen by the inventory core.
///
/// `is_available` is derived from recipe × stock and is only written by the
/// availability cascade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MenuItem {
    pub id: MenuItemId,
    pub name: String,
    pub is_available: bool,
    pub created_at: DateTime<Utc>,
}

impl MenuItem {
    /// New items start available; the first recompute corrects that once a recipe exists.
    pub fn new(id: MenuItemId, name: &str, created_at: DateTime<Utc>) -> Result<Self, DomainError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(DomainError::validation("menu item name cannot be empty"));
        }
        Ok(Self {
            id,
            name: name.to_string(),
            is_available: true,
            created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_item_is_available_with_trimmed_name() {
        let item = MenuItem::new(MenuItemId::new(), " Pizza ", Utc::now()).unwrap();
        assert_eq!(item.name, "Pizza");
        assert!(item.is_available);
    }

    #[test]
    fn blank_name_is_rejected() {
        let err = MenuItem::new(MenuItemId::new(), "   ", Utc::now()).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }
}
