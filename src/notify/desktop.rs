use std::{
    sync::{
        mpsc::{self, Sender},
        Mutex,
    },
    thread,
};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use rodio::{OutputStream, Sink, Source};

use super::{tone::Chime, AlertPrimitives};

const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

enum AudioCommand {
    Play(String),
    SetVolume(f32),
}

/// Speaker-backed primitives for desktop hosts. Desktops have neither an app
/// badge nor a vibration motor, so only sound is supported.
pub struct DesktopPrimitives {
    tx: Mutex<Option<Sender<AudioCommand>>>,
}

impl DesktopPrimitives {
    pub fn new() -> Self {
        Self {
            tx: Mutex::new(None),
        }
    }

    pub fn set_volume(&self, volume: f32) -> Result<()> {
        self.ensure_thread()?
            .send(AudioCommand::SetVolume(volume))
            .map_err(|_| anyhow!("audio thread stopped"))
    }

    fn ensure_thread(&self) -> Result<Sender<AudioCommand>> {
        let mut guard = self
            .tx
            .lock()
            .map_err(|_| anyhow!("audio command lock poisoned"))?;
        if let Some(tx) = guard.as_ref() {
            return Ok(tx.clone());
        }

        let (tx, rx) = mpsc::channel::<AudioCommand>();

        // The output stream is not Send, so it lives on its own thread.
        thread::Builder::new()
            .name("alert-audio".to_string())
            .spawn(move || {
                let (_stream, handle) = match OutputStream::try_default() {
                    Ok(output) => output,
                    Err(err) => {
                        log_warn!("no audio output available: {err}");
                        return;
                    }
                };
                let sink = match Sink::try_new(&handle) {
                    Ok(sink) => sink,
                    Err(err) => {
                        log_warn!("failed to create audio sink: {err}");
                        return;
                    }
                };
                log_info!("alert audio ready");

                while let Ok(command) = rx.recv() {
                    match command {
                        AudioCommand::Play(sound_id) => {
                            sink.append(Chime::for_sound(&sound_id).amplify(0.8));
                        }
                        AudioCommand::SetVolume(volume) => sink.set_volume(volume.clamp(0.0, 1.0)),
                    }
                }
            })
            .context("failed to spawn audio thread")?;

        *guard = Some(tx.clone());
        Ok(tx)
    }
}

impl Default for DesktopPrimitives {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AlertPrimitives for DesktopPrimitives {
    fn is_badge_supported(&self) -> bool {
        false
    }

    async fn set_badge(&self, _count: u32) -> Result<()> {
        Ok(())
    }

    async fn clear_badge(&self) -> Result<()> {
        Ok(())
    }

    fn is_vibration_supported(&self) -> bool {
        false
    }

    fn vibrate(&self, _pattern: &[u64]) {}

    async fn play_sound(&self, sound_id: &str) -> Result<()> {
        let sent = self
            .ensure_thread()?
            .send(AudioCommand::Play(sound_id.to_string()));

        if sent.is_err() {
            // Thread exited (no device); start over on the next call.
            if let Ok(mut guard) = self.tx.lock() {
                guard.take();
            }
            return Err(anyhow!("audio output unavailable"));
        }
        Ok(())
    }
}
