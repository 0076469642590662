//! Advertisement data model.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// One active promotional image belonging to one store.
///
/// Records are immutable once fetched: a new fetch wholesale-replaces the
/// cached list, there is no partial merge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Advertisement {
	pub advertisement_id: i64,
	pub store_id: i64,
	pub store_name: String,
	pub url: String,
	/// External click target; `None` falls back to the store profile.
	#[serde(default)]
	pub link: Option<String>,
}

impl Advertisement {
	/// Click target for this banner: the external link when present,
	/// otherwise the owning store's profile page.
	pub fn resolved_link(&self) -> String {
		match self.link.as_deref() {
			Some(link) if !link.is_empty() => link.to_string(),
			_ => format!("/store/{}", self.store_id),
		}
	}
}

/// Shared handle to an immutable advertisement list.
pub type SharedAdList = Arc<Vec<Advertisement>>;
