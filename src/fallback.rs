//! Rewrites between the lightweight preview render and the full download of a track.
//!
//! `/stream/{session}/{stem}_preview.wav` ↔ `/download/{session}/{stem}.wav`

const STREAM: &str = "/stream/";
const DOWNLOAD: &str = "/download/";
const PREVIEW_SUFFIX: &str = "_preview.wav";

fn split_query(url: &str) -> (&str, &str) {
    match url.find(['?', '#']) {
        Some(i) => url.split_at(i),
        None => (url, ""),
    }
}

/// Full-file URL for a preview URL, `None` if `url` is not a preview.
pub fn download_for_preview(url: &str) -> Option<String> {
    let (path, rest) = split_query(url);
    if !path.contains(STREAM) {
        return None;
    }
    let path = path.replacen(STREAM, DOWNLOAD, 1);
    let path = match path.strip_suffix(PREVIEW_SUFFIX) {
        Some(stem) => format!("{stem}.wav"),
        None => path,
    };
    Some(format!("{path}{rest}"))
}

/// Preview URL for a full-file URL, `None` if `url` is not a download.
pub fn preview_for_download(url: &str) -> Option<String> {
    let (path, rest) = split_query(url);
    if !path.contains(DOWNLOAD) || path.ends_with(PREVIEW_SUFFIX) {
        return None;
    }
    let path = path.replacen(DOWNLOAD, STREAM, 1);
    let stem = path.strip_suffix(".wav")?;
    Some(format!("{stem}{PREVIEW_SUFFIX}{rest}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_to_download() {
        assert_eq!(
            download_for_preview("/stream/s1/club_preview.wav").as_deref(),
            Some("/download/s1/club.wav")
        );
        assert_eq!(
            download_for_preview("https://h/stream/s1/club_preview.wav?v=2").as_deref(),
            Some("https://h/download/s1/club.wav?v=2")
        );
        assert_eq!(download_for_preview("/download/s1/club.wav"), None);
        assert_eq!(download_for_preview("song.flac"), None);
    }

    #[test]
    fn download_to_preview() {
        assert_eq!(
            preview_for_download("/download/s1/club.wav").as_deref(),
            Some("/stream/s1/club_preview.wav")
        );
        assert_eq!(preview_for_download("/download/s1/info.json"), None);
        assert_eq!(preview_for_download("/stream/s1/club_preview.wav"), None);
    }
}
