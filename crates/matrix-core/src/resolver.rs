use std::time::Duration;

use matrix_proto::config::StreamConfig;
use matrix_proto::ChannelId;

use crate::media::OpenOptions;

/// Maps a channel number to what the player needs to open it.  Pure function
/// of configuration.
pub trait ChannelResolver: Send + Sync {
    fn url(&self, channel: ChannelId) -> String;

    fn open_options(&self) -> OpenOptions;
}

impl ChannelResolver for StreamConfig {
    fn url(&self, channel: ChannelId) -> String {
        StreamConfig::url(self, channel)
    }

    fn open_options(&self) -> OpenOptions {
        OpenOptions {
            user: non_empty(&self.user),
            password: non_empty(&self.password),
            tcp: self.tcp,
            network_caching: Duration::from_millis(self.network_caching_ms),
            fullscreen: false,
        }
    }
}

fn non_empty(s: &str) -> Option<String> {
    (!s.is_empty()).then(|| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credentials_only_when_set() {
        let mut stream = StreamConfig::default();
        let opts = stream.open_options();
        assert_eq!(opts.user, None);
        assert_eq!(opts.password, None);
        assert_eq!(opts.network_caching, Duration::from_millis(250));

        stream.user = "admin".into();
        stream.password = "hunter2".into();
        stream.tcp = false;
        let opts = stream.open_options();
        assert_eq!(opts.user.as_deref(), Some("admin"));
        assert_eq!(opts.password.as_deref(), Some("hunter2"));
        assert!(!opts.tcp);

        let resolver: &dyn ChannelResolver = &stream;
        assert!(resolver.url(ChannelId::new(3).unwrap()).contains("channel=3"));
    }
}
