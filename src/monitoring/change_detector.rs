//! Snapshot comparison.
//!
//! [`detect_changes`] is a pure function: it indexes both snapshots by item id
//! and reports what appeared, disappeared or changed in between. It never
//! fails and never touches I/O, so it can be called from any number of
//! request handlers at once.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{HashMap, HashSet};
use std::fmt;

use super::listing::{ListingRecord, Snapshot};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewListing {
    pub item_id: String,
    pub seller: String,
    pub title: String,
    pub price: Option<f64>,
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemovedListing {
    pub item_id: String,
    pub seller: String,
    pub title: String,
    pub price: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceChange {
    pub item_id: String,
    pub seller: String,
    pub title: String,
    pub old_price: Option<f64>,
    pub new_price: Option<f64>,
    /// `None` when either side has no price.
    pub change: Option<f64>,
    pub percent_change: PercentChange,
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TitleChange {
    pub item_id: String,
    pub seller: String,
    pub old_title: String,
    pub new_title: String,
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageChange {
    pub item_id: String,
    pub seller: String,
    pub title: String,
    pub old_image: Option<String>,
    pub new_image: Option<String>,
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RatingChange {
    pub seller: String,
    pub old_rating: Option<f64>,
    pub new_rating: Option<f64>,
    /// Difference rendered with two decimals, `None` when a side is missing.
    pub change: Option<String>,
}

/// Relative price movement in percent.
///
/// `Undefined` covers a previous price of zero and listings where one side has
/// no price at all; no number is invented for those. It serializes as `null`,
/// a finite value as a two-decimal string such as `"-10.00"`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PercentChange {
    Finite(f64),
    Undefined,
}

impl PercentChange {
    pub fn between(old: Option<f64>, new: Option<f64>) -> Self {
        match (old, new) {
            (Some(old), Some(new)) if old != 0.0 => {
                let percent = (new - old) / old * 100.0;
                if percent.is_finite() {
                    PercentChange::Finite(percent)
                } else {
                    PercentChange::Undefined
                }
            }
            _ => PercentChange::Undefined,
        }
    }

    pub fn value(&self) -> Option<f64> {
        match self {
            PercentChange::Finite(v) => Some(*v),
            PercentChange::Undefined => None,
        }
    }
}

impl fmt::Display for PercentChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PercentChange::Finite(v) => write!(f, "{:.2}", v),
            PercentChange::Undefined => write!(f, "n/a"),
        }
    }
}

impl Serialize for PercentChange {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            PercentChange::Finite(_) => serializer.serialize_str(&self.to_string()),
            PercentChange::Undefined => serializer.serialize_none(),
        }
    }
}

impl<'de> Deserialize<'de> for PercentChange {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(raw
            .and_then(|s| s.trim().parse::<f64>().ok())
            .filter(|v| v.is_finite())
            .map(PercentChange::Finite)
            .unwrap_or(PercentChange::Undefined))
    }
}

/// Categorized differences between two snapshots.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffSummary {
    pub has_changes: bool,
    pub new_listings: Vec<NewListing>,
    pub removed_listings: Vec<RemovedListing>,
    pub price_changes: Vec<PriceChange>,
    pub title_changes: Vec<TitleChange>,
    pub image_changes: Vec<ImageChange>,
    pub rating_changes: Vec<RatingChange>,
}

impl DiffSummary {
    pub fn total_changes(&self) -> usize {
        self.new_listings.len()
            + self.removed_listings.len()
            + self.price_changes.len()
            + self.title_changes.len()
            + self.image_changes.len()
            + self.rating_changes.len()
    }

    pub fn counts(&self) -> ChangeCounts {
        ChangeCounts {
            has_changes: self.has_changes,
            total_changes: self.total_changes(),
            price_changes: self.price_changes.len(),
            new_listings: self.new_listings.len(),
            removed_listings: self.removed_listings.len(),
            title_changes: self.title_changes.len(),
            image_changes: self.image_changes.len(),
            rating_changes: self.rating_changes.len(),
        }
    }

    /// Collapses rating changes to the first entry reported for each seller.
    ///
    /// [`detect_changes`] emits one rating change per matched listing, so a
    /// seller with several listings shows up several times.
    pub fn with_ratings_per_seller(mut self) -> Self {
        let mut seen = HashSet::new();
        self.rating_changes
            .retain(|change| seen.insert(change.seller.clone()));
        self.has_changes = self.total_changes() > 0;
        self
    }
}

/// Per-category counts stored in the history table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChangeCounts {
    pub has_changes: bool,
    pub total_changes: usize,
    pub price_changes: usize,
    pub new_listings: usize,
    pub removed_listings: usize,
    pub title_changes: usize,
    pub image_changes: usize,
    pub rating_changes: usize,
}

/// Item id lookup that keeps first-seen order but the last record per id.
struct ListingIndex<'a> {
    order: Vec<&'a str>,
    by_id: HashMap<&'a str, &'a ListingRecord>,
}

impl<'a> ListingIndex<'a> {
    fn build(listings: &'a [ListingRecord]) -> Self {
        let mut order = Vec::with_capacity(listings.len());
        let mut by_id = HashMap::with_capacity(listings.len());

        for listing in listings {
            let id = listing.item_id.as_str();
            if by_id.insert(id, listing).is_none() {
                order.push(id);
            }
        }

        Self { order, by_id }
    }

    fn get(&self, item_id: &str) -> Option<&'a ListingRecord> {
        self.by_id.get(item_id).copied()
    }

    fn contains(&self, item_id: &str) -> bool {
        self.by_id.contains_key(item_id)
    }

    fn iter(&self) -> impl Iterator<Item = &'a ListingRecord> + '_ {
        self.order.iter().map(move |id| self.by_id[id])
    }
}

pub fn detect_changes(previous: &Snapshot, current: &Snapshot) -> DiffSummary {
    let previous_index = ListingIndex::build(&previous.listings);
    let current_index = ListingIndex::build(&current.listings);
    let mut summary = DiffSummary::default();

    for listing in current_index.iter() {
        match previous_index.get(&listing.item_id) {
            None => summary.new_listings.push(NewListing {
                item_id: listing.item_id.clone(),
                seller: listing.seller.clone(),
                title: listing.title.clone(),
                price: listing.price,
                url: listing.url.clone(),
            }),
            Some(before) => compare_fields(before, listing, &mut summary),
        }
    }

    for listing in previous_index.iter() {
        if !current_index.contains(&listing.item_id) {
            summary.removed_listings.push(RemovedListing {
                item_id: listing.item_id.clone(),
                seller: listing.seller.clone(),
                title: listing.title.clone(),
                price: listing.price,
            });
        }
    }

    summary.has_changes = summary.total_changes() > 0;
    summary
}

fn compare_fields(before: &ListingRecord, after: &ListingRecord, summary: &mut DiffSummary) {
    if before.price != after.price {
        summary.price_changes.push(PriceChange {
            item_id: after.item_id.clone(),
            seller: after.seller.clone(),
            title: after.title.clone(),
            old_price: before.price,
            new_price: after.price,
            change: before.price.zip(after.price).map(|(old, new)| new - old),
            percent_change: PercentChange::between(before.price, after.price),
            url: after.url.clone(),
        });
    }

    if before.title != after.title {
        summary.title_changes.push(TitleChange {
            item_id: after.item_id.clone(),
            seller: after.seller.clone(),
            old_title: before.title.clone(),
            new_title: after.title.clone(),
            url: after.url.clone(),
        });
    }

    if before.image != after.image {
        summary.image_changes.push(ImageChange {
            item_id: after.item_id.clone(),
            seller: after.seller.clone(),
            title: after.title.clone(),
            old_image: before.image.clone(),
            new_image: after.image.clone(),
            url: after.url.clone(),
        });
    }

    if before.seller_feedback_percentage != after.seller_feedback_percentage {
        summary.rating_changes.push(RatingChange {
            seller: after.seller.clone(),
            old_rating: before.seller_feedback_percentage,
            new_rating: after.seller_feedback_percentage,
            change: before
                .seller_feedback_percentage
                .zip(after.seller_feedback_percentage)
                .map(|(old, new)| format!("{:.2}", new - old)),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn snapshot(listings: Vec<ListingRecord>) -> Snapshot {
        Snapshot::new(Utc::now(), listings)
    }

    fn iphone(item_id: &str) -> ListingRecord {
        ListingRecord::new(item_id, "s", "iPhone")
            .with_price(500.0)
            .with_url("u")
    }

    #[test]
    fn test_first_run_reports_every_listing_as_new() {
        let changes = detect_changes(&Snapshot::empty(), &snapshot(vec![iphone("1")]));

        assert!(changes.has_changes);
        assert_eq!(
            changes.new_listings,
            vec![NewListing {
                item_id: "1".to_string(),
                seller: "s".to_string(),
                title: "iPhone".to_string(),
                price: Some(500.0),
                url: Some("u".to_string()),
            }]
        );
        assert_eq!(changes.total_changes(), 1);
    }

    #[test]
    fn test_price_drop() {
        let previous = snapshot(vec![iphone("1")]);
        let current = snapshot(vec![iphone("1").with_price(450.0)]);

        let changes = detect_changes(&previous, &current);

        assert!(changes.has_changes);
        assert_eq!(changes.price_changes.len(), 1);
        let price = &changes.price_changes[0];
        assert_eq!(price.item_id, "1");
        assert_eq!(price.old_price, Some(500.0));
        assert_eq!(price.new_price, Some(450.0));
        assert_eq!(price.change, Some(-50.0));
        assert_eq!(price.percent_change.to_string(), "-10.00");
        assert_eq!(changes.total_changes(), 1);
    }

    #[test]
    fn test_missing_listing_is_removed() {
        let changes = detect_changes(&snapshot(vec![iphone("1")]), &snapshot(vec![]));

        assert!(changes.has_changes);
        assert_eq!(changes.removed_listings.len(), 1);
        assert_eq!(changes.removed_listings[0].item_id, "1");
        assert_eq!(changes.removed_listings[0].price, Some(500.0));
        assert!(changes.new_listings.is_empty());
    }

    #[test]
    fn test_url_and_informational_fields_are_ignored() {
        let mut after = iphone("1").with_url("https://www.ebay.com/itm/1?mkevt=1");
        after.condition = Some("USED".to_string());
        after.seller_feedback_score = Some(9000);
        after.currency = Some("USD".to_string());

        let changes = detect_changes(&snapshot(vec![iphone("1")]), &snapshot(vec![after]));

        assert!(!changes.has_changes);
        assert_eq!(changes, DiffSummary::default());
    }

    #[test]
    fn test_feedback_percentage_change() {
        let previous = snapshot(vec![iphone("1").with_feedback_percentage(98.5)]);
        let current = snapshot(vec![iphone("1").with_feedback_percentage(99.0)]);

        let changes = detect_changes(&previous, &current);

        assert_eq!(
            changes.rating_changes,
            vec![RatingChange {
                seller: "s".to_string(),
                old_rating: Some(98.5),
                new_rating: Some(99.0),
                change: Some("0.50".to_string()),
            }]
        );
    }

    #[test]
    fn test_rating_change_is_reported_per_listing() {
        let previous = snapshot(vec![
            iphone("1").with_feedback_percentage(98.5),
            iphone("2").with_feedback_percentage(98.5),
            iphone("3").with_feedback_percentage(98.5),
        ]);
        let current = snapshot(vec![
            iphone("1").with_feedback_percentage(97.0),
            iphone("2").with_feedback_percentage(97.0),
            iphone("3").with_feedback_percentage(97.0),
        ]);

        let changes = detect_changes(&previous, &current);
        assert_eq!(changes.rating_changes.len(), 3);
        assert!(changes.rating_changes.iter().all(|c| c.change.as_deref() == Some("-1.50")));

        let deduped = changes.with_ratings_per_seller();
        assert_eq!(deduped.rating_changes.len(), 1);
        assert!(deduped.has_changes);
    }

    #[test]
    fn test_dedupe_keeps_one_entry_per_seller() {
        let mut other = iphone("9").with_feedback_percentage(90.0);
        other.seller = "t".to_string();
        let mut other_after = other.clone();
        other_after.seller_feedback_percentage = Some(91.0);

        let previous = snapshot(vec![
            iphone("1").with_feedback_percentage(98.5),
            other,
            iphone("2").with_feedback_percentage(98.5),
        ]);
        let current = snapshot(vec![
            iphone("1").with_feedback_percentage(99.0),
            other_after,
            iphone("2").with_feedback_percentage(99.0),
        ]);

        let deduped = detect_changes(&previous, &current).with_ratings_per_seller();
        let sellers: Vec<&str> = deduped.rating_changes.iter().map(|c| c.seller.as_str()).collect();
        assert_eq!(sellers, vec!["s", "t"]);
    }

    #[test]
    fn test_zero_previous_price_has_undefined_percent() {
        let previous = snapshot(vec![iphone("1").with_price(0.0)]);
        let current = snapshot(vec![iphone("1").with_price(25.0)]);

        let changes = detect_changes(&previous, &current);
        let price = &changes.price_changes[0];
        assert_eq!(price.change, Some(25.0));
        assert_eq!(price.percent_change, PercentChange::Undefined);

        let json = serde_json::to_value(price).unwrap();
        assert!(json["percentChange"].is_null());
    }

    #[test]
    fn test_price_disappearing_is_a_price_change() {
        let mut after = iphone("1");
        after.price = None;

        let changes = detect_changes(&snapshot(vec![iphone("1")]), &snapshot(vec![after]));
        let price = &changes.price_changes[0];
        assert_eq!(price.new_price, None);
        assert_eq!(price.change, None);
        assert_eq!(price.percent_change, PercentChange::Undefined);
    }

    #[test]
    fn test_image_added_counts_as_change() {
        let previous = snapshot(vec![iphone("1")]);
        let current = snapshot(vec![iphone("1").with_image("https://i.ebayimg.com/1.jpg")]);

        let changes = detect_changes(&previous, &current);
        assert_eq!(changes.image_changes.len(), 1);
        assert_eq!(changes.image_changes[0].old_image, None);
        assert_eq!(
            changes.image_changes[0].new_image.as_deref(),
            Some("https://i.ebayimg.com/1.jpg")
        );
    }

    #[test]
    fn test_matched_item_can_change_several_fields() {
        let mut after = iphone("1").with_price(520.0).with_image("img");
        after.title = "iPhone 13 Pro".to_string();

        let changes = detect_changes(&snapshot(vec![iphone("1")]), &snapshot(vec![after]));
        assert_eq!(changes.price_changes.len(), 1);
        assert_eq!(changes.title_changes.len(), 1);
        assert_eq!(changes.image_changes.len(), 1);
        assert_eq!(changes.title_changes[0].old_title, "iPhone");
        assert_eq!(changes.title_changes[0].new_title, "iPhone 13 Pro");
        assert_eq!(changes.counts().total_changes, 3);
    }

    #[test]
    fn test_duplicate_item_id_last_record_wins() {
        let previous = snapshot(vec![iphone("1")]);
        let current = snapshot(vec![
            iphone("1").with_price(400.0),
            iphone("2"),
            iphone("1").with_price(500.0),
        ]);

        let changes = detect_changes(&previous, &current);
        assert!(changes.price_changes.is_empty());
        assert_eq!(changes.new_listings.len(), 1);
        assert_eq!(changes.new_listings[0].item_id, "2");
    }

    #[test]
    fn test_output_follows_input_order() {
        let previous = snapshot(vec![iphone("c"), iphone("a"), iphone("x"), iphone("b")]);
        let current = snapshot(vec![iphone("z"), iphone("x"), iphone("y"), iphone("w")]);

        let changes = detect_changes(&previous, &current);
        let added: Vec<&str> = changes.new_listings.iter().map(|l| l.item_id.as_str()).collect();
        let removed: Vec<&str> = changes
            .removed_listings
            .iter()
            .map(|l| l.item_id.as_str())
            .collect();
        assert_eq!(added, vec!["z", "y", "w"]);
        assert_eq!(removed, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_summary_serializes_with_camel_case_keys() {
        let changes = detect_changes(
            &snapshot(vec![iphone("1")]),
            &snapshot(vec![iphone("1").with_price(450.0)]),
        );
        let json = serde_json::to_value(&changes).unwrap();

        assert_eq!(json["hasChanges"], true);
        assert_eq!(json["priceChanges"][0]["percentChange"], "-10.00");
        assert_eq!(json["priceChanges"][0]["oldPrice"], 500.0);
        assert!(json["newListings"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_percent_change_reads_stored_strings() {
        let finite: PercentChange = serde_json::from_str("\"-10.00\"").unwrap();
        assert_eq!(finite.value(), Some(-10.0));

        let infinite: PercentChange = serde_json::from_str("\"Infinity\"").unwrap();
        assert_eq!(infinite, PercentChange::Undefined);

        let missing: PercentChange = serde_json::from_str("null").unwrap();
        assert_eq!(missing, PercentChange::Undefined);
    }
}
