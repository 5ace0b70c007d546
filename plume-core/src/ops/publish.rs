use std::path::PathBuf;

use tracing::{debug, info};

use crate::config::PlatformSection;
use crate::engine::{
    target_entry, ActionEngine, ActionSurface, ActionTarget, EngineError, ResolveOptions,
};

use super::{OpError, OpResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Images,
    Video,
}

#[derive(Debug, Clone)]
pub struct Draft {
    pub title: String,
    pub body: String,
    pub media_paths: Vec<PathBuf>,
}

const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mov", "wmv", "flv", "mkv", "webm", "m4v"];
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "webp", "tiff"];

fn classify_media(paths: &[PathBuf]) -> OpResult<MediaKind> {
    if paths.is_empty() {
        return Err(OpError::InvalidInput("at least one media file required".into()));
    }
    let mut has_video = false;
    let mut has_image = false;
    for path in paths {
        if !path.exists() {
            return Err(OpError::InvalidInput(format!(
                "media file does not exist: {}",
                path.display()
            )));
        }
        let ext = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_lowercase())
            .unwrap_or_default();
        if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
            has_video = true;
        } else if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            has_image = true;
        } else {
            return Err(OpError::InvalidInput(format!("unsupported file type: .{ext}")));
        }
    }
    if has_video && has_image {
        return Err(OpError::InvalidInput(
            "images and video cannot be mixed in one draft".into(),
        ));
    }
    if has_video && paths.len() > 1 {
        return Err(OpError::InvalidInput("only one video per draft".into()));
    }
    Ok(if has_video {
        MediaKind::Video
    } else {
        MediaKind::Images
    })
}

/// Publishes a draft through the creator studio: pick the tab for the media
/// kind, attach files, fill title and body, then fire the publish control.
/// A redirect after the click is the success signal; the studio navigates to
/// the manage view once the draft is accepted.
pub async fn publish(
    engine: &ActionEngine,
    surface: &mut dyn ActionSurface,
    platform: &PlatformSection,
    draft: &Draft,
) -> OpResult<()> {
    let kind = classify_media(&draft.media_paths)?;
    let creator_url = platform.creator_url.as_ref().ok_or_else(|| {
        OpError::InvalidInput("platform has no creator studio configured".into())
    })?;

    surface.navigate(creator_url).await?;

    let tab_target = match kind {
        MediaKind::Images => ActionTarget::MediaTabImage,
        MediaKind::Video => ActionTarget::MediaTabVideo,
    };
    let tab_entry = target_entry(&platform.targets, tab_target);
    match engine
        .resolve(surface, tab_target, tab_entry, &ResolveOptions::default())
        .await
    {
        Ok(tab) => engine.click(surface, tab.element).await?,
        // Some studio layouts land directly in the right mode.
        Err(EngineError::ElementNotFound { .. }) => {
            debug!(kind = ?kind, "no media tab found, assuming default mode");
        }
        Err(err) => return Err(err.into()),
    }

    let file_entry = target_entry(&platform.targets, ActionTarget::FileInput);
    let file_input = engine
        .resolve(surface, ActionTarget::FileInput, file_entry, &ResolveOptions::default())
        .await?;
    surface
        .attach_files(file_input.element, &draft.media_paths)
        .await?;
    surface.settle().await;

    let title_entry = target_entry(&platform.targets, ActionTarget::TitleInput);
    let title = engine
        .resolve(surface, ActionTarget::TitleInput, title_entry, &ResolveOptions::default())
        .await?;
    engine.enter_text(surface, title.element, &draft.title).await?;

    let body_entry = target_entry(&platform.targets, ActionTarget::BodyEditor);
    let body = engine
        .resolve(surface, ActionTarget::BodyEditor, body_entry, &ResolveOptions::default())
        .await?;
    engine.enter_text(surface, body.element, &draft.body).await?;

    let publish_entry = target_entry(&platform.targets, ActionTarget::PublishControl);
    let control = engine
        .resolve(
            surface,
            ActionTarget::PublishControl,
            publish_entry,
            &ResolveOptions::default(),
        )
        .await?;
    engine.click(surface, control.element).await?;
    surface.settle().await;

    if surface.is_stale().await? {
        info!(kind = ?kind, "draft published (studio redirected)");
        return Ok(());
    }
    // No redirect: check the title input; the studio clears the form when the
    // draft is accepted in place.
    let remaining = surface.read_text(title.element).await.unwrap_or_default();
    if remaining.is_empty() {
        info!(kind = ?kind, "draft published (form cleared)");
        Ok(())
    } else {
        Err(EngineError::ActionVerificationFailed {
            action: "publish".into(),
        }
        .into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn touch(dir: &std::path::Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, b"media").unwrap();
        path
    }

    #[test]
    fn images_classify_as_image_kind() {
        let dir = tempdir().unwrap();
        let paths = vec![touch(dir.path(), "a.jpg"), touch(dir.path(), "b.png")];
        assert_eq!(classify_media(&paths).unwrap(), MediaKind::Images);
    }

    #[test]
    fn mixed_media_is_rejected() {
        let dir = tempdir().unwrap();
        let paths = vec![touch(dir.path(), "a.jpg"), touch(dir.path(), "b.mp4")];
        assert!(classify_media(&paths).is_err());
    }

    #[test]
    fn multiple_videos_are_rejected() {
        let dir = tempdir().unwrap();
        let paths = vec![touch(dir.path(), "a.mp4"), touch(dir.path(), "b.mp4")];
        assert!(classify_media(&paths).is_err());
    }

    #[test]
    fn missing_file_is_rejected() {
        let paths = vec![PathBuf::from("/nonexistent/file.jpg")];
        assert!(classify_media(&paths).is_err());
    }
}
