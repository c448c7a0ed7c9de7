use parking_lot::RwLock;
use serde::Serialize;
use sim_config::WorldConfig;
use sim_core::{Result, SimError};
use tracing::info;

/// Something in a location, with the status agents last left it in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Item {
    pub name: String,
    pub status: String,
}

struct Place {
    name: String,
    items: Vec<Item>,
}

/// Item names are matched ignoring case and surrounding whitespace.
fn same_item(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

/// The places of the world and the items in each.
///
/// Locations are fixed at construction; only item statuses change.
pub struct WorldMap {
    places: RwLock<Vec<Place>>,
}

impl WorldMap {
    pub fn from_config(config: &WorldConfig) -> Self {
        let places = config
            .locations
            .iter()
            .map(|location| Place {
                name: location.name.clone(),
                items: location
                    .items
                    .iter()
                    .map(|item| Item {
                        name: item.name.clone(),
                        status: item.status.clone(),
                    })
                    .collect(),
            })
            .collect();
        Self {
            places: RwLock::new(places),
        }
    }

    pub fn location_names(&self) -> Vec<String> {
        self.places.read().iter().map(|p| p.name.clone()).collect()
    }

    pub fn contains(&self, location: &str) -> bool {
        self.places.read().iter().any(|p| p.name == location)
    }

    /// Items at `location`, in configured order. Empty for unknown places.
    pub fn items_at(&self, location: &str) -> Vec<Item> {
        self.places
            .read()
            .iter()
            .find(|p| p.name == location)
            .map(|p| p.items.clone())
            .unwrap_or_default()
    }

    /// Set the status of `item` at `location`.
    pub fn set_item_status(&self, location: &str, item: &str, status: &str) -> Result<()> {
        let mut places = self.places.write();
        let place = places
            .iter_mut()
            .find(|p| p.name == location)
            .ok_or_else(|| SimError::World(format!("unknown location '{location}'")))?;
        let target = place
            .items
            .iter_mut()
            .find(|i| same_item(&i.name, item))
            .ok_or_else(|| SimError::World(format!("no item '{item}' in {location}")))?;
        if target.status != status {
            info!(%location, item = %target.name, from = %target.status, to = %status, "item status changed");
            target.status = status.to_string();
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.places.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.places.read().is_empty()
    }
}
