use crate::model::ProgressDoc;
use crate::store::{Collection, Store};
use serde::Serialize;
use serde_json::json;

/// Progress documents use a deterministic composite id so repeated writes for
/// the same (student, video) pair collide by construction instead of relying
/// on a query-then-write race.
pub fn progress_id(user_id: &str, video_id: &str) -> String {
    format!("{}_{}", user_id, video_id)
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    pub watch_time: u64,
    pub completion_percentage: u32,
    pub watch_count: u64,
}

/// floor(100 * position / duration), clamped to 0..=100. An unknown or zero
/// duration computes as 0 rather than failing.
pub fn completion_percentage(position_secs: f64, duration_secs: f64) -> u32 {
    if !(duration_secs > 0.0) || !position_secs.is_finite() {
        return 0;
    }
    let pct = ((position_secs / duration_secs) * 100.0).floor();
    pct.clamp(0.0, 100.0) as u32
}

/// Records one playback position sample. Stored watchTime and
/// completionPercentage only ever grow: the update is a read-compare-write
/// inside a store transaction, so out-of-order and duplicate samples cannot
/// regress either field.
pub fn apply_sample(
    store: &Store,
    user_id: &str,
    video_id: &str,
    position_secs: f64,
    duration_secs: f64,
) -> anyhow::Result<ProgressSnapshot> {
    let watch_time = position_secs.max(0.0).floor() as u64;
    let computed = completion_percentage(position_secs, duration_secs);
    write_monotonic(store, user_id, video_id, watch_time, computed)
}

/// Handles a playback-ended event: completionPercentage is forced to 100
/// (players can report a non-100% position at the end), then watchCount is
/// bumped through the store's atomic increment so duplicate end events from
/// retries each count exactly once.
pub fn record_ended(
    store: &Store,
    user_id: &str,
    video_id: &str,
    position_secs: Option<f64>,
) -> anyhow::Result<ProgressSnapshot> {
    let watch_time = position_secs.unwrap_or(0.0).max(0.0).floor() as u64;
    let snapshot = write_monotonic(store, user_id, video_id, watch_time, 100)?;
    let count = store.atomic_increment(
        Collection::Progress,
        &progress_id(user_id, video_id),
        "watchCount",
        1,
    )?;
    Ok(ProgressSnapshot {
        watch_count: count.max(0) as u64,
        ..snapshot
    })
}

pub fn load(store: &Store, user_id: &str, video_id: &str) -> anyhow::Result<Option<ProgressDoc>> {
    let doc = store.get(Collection::Progress, &progress_id(user_id, video_id))?;
    match doc {
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
        None => Ok(None),
    }
}

fn write_monotonic(
    store: &Store,
    user_id: &str,
    video_id: &str,
    watch_time: u64,
    completion: u32,
) -> anyhow::Result<ProgressSnapshot> {
    let id = progress_id(user_id, video_id);
    store.transaction(|tx| {
        let existing = tx.get(Collection::Progress, &id)?;
        let (old_watch, old_pct, old_count, has_count) = match &existing {
            Some(doc) => (
                doc.get("watchTime").and_then(|v| v.as_u64()).unwrap_or(0),
                doc.get("completionPercentage")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(0) as u32,
                doc.get("watchCount").and_then(|v| v.as_u64()).unwrap_or(0),
                doc.get("watchCount").is_some(),
            ),
            None => (0, 0, 0, false),
        };

        let new_watch = old_watch.max(watch_time);
        let new_pct = old_pct.max(completion).min(100);

        let mut partial = json!({
            "userId": user_id,
            "videoId": video_id,
            "watchTime": new_watch,
            "completionPercentage": new_pct,
            "updatedAt": chrono::Utc::now().to_rfc3339(),
        });
        // First write seeds the counter; later writes must not clobber it.
        if !has_count {
            partial["watchCount"] = json!(0);
        }

        tx.set_with_merge(Collection::Progress, &id, &partial)?;
        Ok(ProgressSnapshot {
            watch_time: new_watch,
            completion_percentage: new_pct,
            watch_count: old_count,
        })
    })
}
