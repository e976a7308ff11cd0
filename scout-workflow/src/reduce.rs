//! Local processing of scraped records.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HandleMetrics {
    pub handle: String,
    pub post_count: u64,
    pub total_likes: u64,
    pub total_comments: u64,
    pub total_views: u64,
    pub avg_likes: f64,
    pub avg_comments: f64,
    pub avg_views: f64,
}

/// Lower-cased account name a scraped record belongs to.
pub fn item_owner(item: &Value) -> Option<String> {
    ["ownerUsername", "username", "owner"]
        .iter()
        .find_map(|key| item.get(*key).and_then(Value::as_str))
        .map(|name| name.trim().trim_start_matches('@').to_lowercase())
        .filter(|name| !name.is_empty())
}

fn count(item: &Value, keys: &[&str]) -> u64 {
    keys.iter()
        .find_map(|key| item.get(*key).and_then(Value::as_u64))
        .unwrap_or(0)
}

/// Distinct post owners in first-seen order.
pub fn post_owners(items: &[Value]) -> Vec<String> {
    let mut seen = HashSet::new();
    items
        .iter()
        .filter_map(item_owner)
        .filter(|name| seen.insert(name.clone()))
        .collect()
}

/// Per-handle totals and averages over the scraped posts. Every requested
/// handle gets an entry, zeroed when it had no posts in the window.
pub fn reduce_post_metrics(handles: &[String], posts: &[Value]) -> Vec<HandleMetrics> {
    let mut by_handle: HashMap<&str, HandleMetrics> = handles
        .iter()
        .map(|h| {
            (
                h.as_str(),
                HandleMetrics {
                    handle: h.clone(),
                    ..Default::default()
                },
            )
        })
        .collect();

    for post in posts {
        let Some(name) = item_owner(post) else { continue };
        let Some(metrics) = by_handle.get_mut(name.as_str()) else {
            continue;
        };
        metrics.post_count += 1;
        metrics.total_likes += count(post, &["likesCount", "likes"]);
        metrics.total_comments += count(post, &["commentsCount", "comments"]);
        metrics.total_views += count(post, &["videoViewCount", "videoPlayCount", "views"]);
    }

    handles
        .iter()
        .filter_map(|h| by_handle.remove(h.as_str()))
        .map(|mut m| {
            if m.post_count > 0 {
                let n = m.post_count as f64;
                m.avg_likes = m.total_likes as f64 / n;
                m.avg_comments = m.total_comments as f64 / n;
                m.avg_views = m.total_views as f64 / n;
            }
            m
        })
        .collect()
}
