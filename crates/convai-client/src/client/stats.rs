/// Traffic counters for one connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stats {
    messages_received: u64,
    audio_chunks_received: u64,
    audio_chunks_sent: u64,
    pings_answered: u64,
}

impl Stats {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_received(&mut self, is_audio: bool) {
        self.messages_received += 1;
        if is_audio {
            self.audio_chunks_received += 1;
        }
    }

    pub(crate) fn record_audio_sent(&mut self) {
        self.audio_chunks_sent += 1;
    }

    pub(crate) fn record_pong(&mut self) {
        self.pings_answered += 1;
    }

    pub fn messages_received(&self) -> u64 {
        self.messages_received
    }

    pub fn audio_chunks_received(&self) -> u64 {
        self.audio_chunks_received
    }

    pub fn audio_chunks_sent(&self) -> u64 {
        self.audio_chunks_sent
    }

    pub fn pings_answered(&self) -> u64 {
        self.pings_answered
    }
}
