//! Image retention: keep the K newest tags per repository.
//!
//! For every `(registry, repository)` the pod references, local tags are
//! ordered by the two-class tag ordering (numeric versions first,
//! then lexicographic tags) and everything beyond the newest K is
//! removed — except tags a running container still references. Untagged
//! images are never touched.

use std::collections::BTreeSet;

use tracing::{debug, info};

use crate::engine::EngineClient;
use crate::error::Result;
use crate::name::{compare_tags, ImageName};
use crate::pod::manifest::Pod;

/// Outcome of a retention sweep.
#[derive(Debug, Default)]
pub struct CleanReport {
    pub kept: Vec<ImageName>,
    pub removed: Vec<ImageName>,
}

/// Removes old image revisions for every repository the pod uses.
///
/// `keep` is the number of newest tags preserved per repository; tags
/// referenced by any running container are preserved on top of that.
pub async fn clean(engine: &dyn EngineClient, pod: &Pod, keep: usize) -> Result<CleanReport> {
    let repos: BTreeSet<String> = pod.images().iter().map(ImageName::repo_key).collect();

    let in_use: BTreeSet<(String, String)> = engine
        .running_images()
        .await?
        .into_iter()
        .map(|image| (image.repo_key(), image.effective_tag().to_string()))
        .collect();

    let mut report = CleanReport::default();
    for repo in repos {
        let mut tags = engine.list_tags(&repo).await?;
        // Newest first.
        tags.sort_by(|a, b| compare_tags(b, a));

        for (index, tag) in tags.into_iter().enumerate() {
            let image = ImageName::parse(&repo)?.with_tag(tag.as_str());
            let referenced = in_use.contains(&(repo.clone(), tag.clone()));
            if index < keep || referenced {
                debug!(image = %image, referenced, "keeping image");
                report.kept.push(image);
            } else {
                engine.remove_image(&image).await?;
                report.removed.push(image);
            }
        }
    }

    info!(
        kept = report.kept.len(),
        removed = report.removed.len(),
        "image retention sweep complete"
    );
    Ok(report)
}
