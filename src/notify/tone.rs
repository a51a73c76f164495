use rodio::Source;
use std::f32::consts::PI;
use std::time::Duration;

const SAMPLE_RATE: u32 = 44100;

/// Short synthesized cue: a few sine notes, each fading out.
pub struct Chime {
    /// (frequency in Hz, length in samples)
    notes: Vec<(f32, u32)>,
    note_index: usize,
    sample_in_note: u32,
}

impl Chime {
    pub fn for_sound(sound_id: &str) -> Self {
        let notes: &[(f32, u64)] = match sound_id {
            // Urgent triple beep
            "alert" => &[(1046.5, 120), (0.0, 60), (1046.5, 120), (0.0, 60), (1046.5, 120)],
            // Rising major arpeggio
            "success" => &[(523.25, 120), (659.25, 120), (783.99, 240)],
            _ => &[(880.0, 200), (659.25, 200), (880.0, 200), (659.25, 300)],
        };

        Self {
            notes: notes
                .iter()
                .map(|(frequency, millis)| (*frequency, (SAMPLE_RATE as u64 * millis / 1000) as u32))
                .collect(),
            note_index: 0,
            sample_in_note: 0,
        }
    }

    fn total_samples(&self) -> u64 {
        self.notes.iter().map(|(_, samples)| *samples as u64).sum()
    }
}

impl Iterator for Chime {
    type Item = f32;

    fn next(&mut self) -> Option<Self::Item> {
        let (frequency, length) = *self.notes.get(self.note_index)?;

        let t = self.sample_in_note as f32 / SAMPLE_RATE as f32;
        let fade = 1.0 - self.sample_in_note as f32 / length.max(1) as f32;
        let sample = if frequency > 0.0 {
            (2.0 * PI * frequency * t).sin() * fade * 0.25
        } else {
            0.0
        };

        self.sample_in_note += 1;
        if self.sample_in_note >= length {
            self.sample_in_note = 0;
            self.note_index += 1;
        }

        Some(sample)
    }
}

impl Source for Chime {
    fn current_frame_len(&self) -> Option<usize> {
        None
    }

    fn channels(&self) -> u16 {
        1
    }

    fn sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }

    fn total_duration(&self) -> Option<Duration> {
        Some(Duration::from_millis(
            self.total_samples() * 1000 / SAMPLE_RATE as u64,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chimes_end_and_stay_quiet() {
        for sound in ["booking", "alert", "success", "unknown"] {
            let chime = Chime::for_sound(sound);
            let expected = chime.total_samples() as usize;
            let samples: Vec<f32> = chime.collect();
            assert_eq!(samples.len(), expected, "{sound}");
            assert!(samples.iter().all(|sample| sample.abs() <= 0.25));
        }
    }

    #[test]
    fn alert_is_shorter_than_the_booking_cue() {
        let alert = Chime::for_sound("alert").total_duration().unwrap();
        let booking = Chime::for_sound("booking").total_duration().unwrap();
        assert!(alert < booking);
    }
}
