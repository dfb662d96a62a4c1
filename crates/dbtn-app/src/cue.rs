//! Sound cues played on the device

use std::sync::Arc;

use dbtn_core::prelude::*;
use dbtn_core::{AudioCueMap, CueEvent};
use dbtn_link::{AdapterSource, OutboundCommand};

use crate::config::ConfigStore;

/// Destination for cue events raised by the orchestrator and dispatcher
#[trait_variant::make(CueSink: Send)]
pub trait LocalCueSink {
    /// Play the sound for `cue`. Never fails; problems are logged.
    async fn play(&self, cue: CueEvent);
}

/// Plays cues through whichever adapter is current when the cue fires
pub struct SoundCuePlayer {
    adapters: Arc<dyn AdapterSource>,
    settings: ConfigStore,
}

impl SoundCuePlayer {
    pub fn new(adapters: Arc<dyn AdapterSource>, settings: ConfigStore) -> Self {
        Self { adapters, settings }
    }
}

/// Device commands for one cue, or empty when the cue is disabled or invalid
pub fn cue_commands(audio: &AudioCueMap, cue: CueEvent) -> Vec<OutboundCommand> {
    let sound_id = audio.sound_for(cue);
    if sound_id.is_empty() {
        trace!("No sound configured for {}", cue);
        return Vec::new();
    }

    let Some(play) = OutboundCommand::play_sound(sound_id) else {
        warn!("Invalid sound id {:?} for {}", sound_id, cue);
        return Vec::new();
    };

    let mut commands = Vec::with_capacity(2);
    match OutboundCommand::set_volume(audio.volume) {
        Some(volume) => commands.push(volume),
        None => debug!("Volume {} out of range, leaving device volume", audio.volume),
    }
    commands.push(play);
    commands
}

impl CueSink for SoundCuePlayer {
    async fn play(&self, cue: CueEvent) {
        // Read fresh so a config change between cues is honored
        let audio = self.settings.audio();
        let commands = cue_commands(&audio, cue);
        if commands.is_empty() {
            return;
        }

        let Some(adapter) = self.adapters.current_adapter() else {
            debug!("No device connected, dropping {} cue", cue);
            return;
        };

        for command in commands {
            if let Err(e) = adapter.send_command(command).await {
                warn!("Failed to play {} cue: {}", cue, e);
                return;
            }
        }
        debug!("Played {} cue on {}", cue, adapter.port_name());
    }
}

#[cfg(test)]
mod tests {
    use super::{cue_commands, CueSink, SoundCuePlayer};
    use crate::config::{ConfigStore, Settings};
    use dbtn_core::{AudioCueMap, CueEvent};
    use dbtn_link::{AdapterSource, LinkAdapter, OutboundCommand};
    use std::sync::Arc;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, BufReader};

    struct FixedAdapter(Mutex<Option<Arc<LinkAdapter>>>);

    impl AdapterSource for FixedAdapter {
        fn current_adapter(&self) -> Option<Arc<LinkAdapter>> {
            self.0.lock().unwrap().clone()
        }
    }

    #[test]
    fn test_cue_commands_volume_then_play() {
        let audio = AudioCueMap::default();
        assert_eq!(
            cue_commands(&audio, CueEvent::BuildQueued),
            vec![OutboundCommand::SetVolume(15), OutboundCommand::PlaySound(3)]
        );
    }

    #[test]
    fn test_cue_commands_disabled_and_invalid() {
        let mut audio = AudioCueMap::default();
        assert!(cue_commands(&audio, CueEvent::ButtonPressed).is_empty());

        audio.sounds.build_failed = "0300".to_string();
        assert!(cue_commands(&audio, CueEvent::BuildFailed).is_empty());

        audio.sounds.build_failed = "beep".to_string();
        assert!(cue_commands(&audio, CueEvent::BuildFailed).is_empty());
    }

    #[test]
    fn test_cue_commands_skip_out_of_range_volume() {
        let mut audio = AudioCueMap::default();
        audio.volume = 31;
        assert_eq!(
            cue_commands(&audio, CueEvent::BuildSucceeded),
            vec![OutboundCommand::PlaySound(24)]
        );
    }

    #[tokio::test]
    async fn test_play_writes_to_current_adapter() {
        let (host, device) = tokio::io::duplex(1024);
        let adapter = Arc::new(LinkAdapter::from_stream("TEST0", 9600, Box::new(host)));
        let source = Arc::new(FixedAdapter(Mutex::new(Some(Arc::clone(&adapter)))));

        let mut settings = Settings::default();
        settings.audio.volume = 20;
        let player = SoundCuePlayer::new(source, ConfigStore::in_memory(settings));

        player.play(CueEvent::BuildFailed).await;

        let mut lines = BufReader::new(device).lines();
        assert_eq!(lines.next_line().await.unwrap().unwrap(), "SETVOLUME 20");
        assert_eq!(lines.next_line().await.unwrap().unwrap(), "PLAYSOUND 12");
    }

    #[tokio::test]
    async fn test_play_reads_audio_config_each_time() {
        let (host, device) = tokio::io::duplex(1024);
        let adapter = Arc::new(LinkAdapter::from_stream("TEST0", 9600, Box::new(host)));
        let source = Arc::new(FixedAdapter(Mutex::new(Some(adapter))));
        let store = ConfigStore::in_memory(Settings::default());
        let player = SoundCuePlayer::new(source, store.clone());

        player.play(CueEvent::BuildQueued).await;

        let mut updated = Settings::default();
        updated.audio.sounds.build_queued = "7".to_string();
        store.replace(updated);
        player.play(CueEvent::BuildQueued).await;

        let mut lines = BufReader::new(device).lines();
        let mut received = Vec::new();
        for _ in 0..4 {
            received.push(lines.next_line().await.unwrap().unwrap());
        }
        assert_eq!(
            received,
            vec!["SETVOLUME 15", "PLAYSOUND 3", "SETVOLUME 15", "PLAYSOUND 7"]
        );
    }

    #[tokio::test]
    async fn test_play_without_adapter_is_noop() {
        let source = Arc::new(FixedAdapter(Mutex::new(None)));
        let player = SoundCuePlayer::new(source, ConfigStore::in_memory(Settings::default()));

        tokio::time::timeout(Duration::from_secs(1), player.play(CueEvent::BuildSucceeded))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_play_on_closed_adapter_does_not_panic() {
        let (host, _device) = tokio::io::duplex(64);
        let adapter = Arc::new(LinkAdapter::from_stream("TEST0", 9600, Box::new(host)));
        adapter.disconnect().await;
        let source = Arc::new(FixedAdapter(Mutex::new(Some(adapter))));
        let player = SoundCuePlayer::new(source, ConfigStore::in_memory(Settings::default()));

        player.play(CueEvent::BuildQueued).await;
    }
}
