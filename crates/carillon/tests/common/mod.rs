//! Shared fixtures: SMF files written with midly, an in-memory sound bank

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use carillon::{AudioTap, EventStream, LifecycleEvent, MemoryBank, MidiPlayer, PlayerConfig};
use futures::StreamExt;
use midly::num::{u15, u24, u28, u4, u7};
use midly::{Format, Header, MetaMessage, MidiMessage, Smf, Timing, TrackEvent, TrackEventKind};

pub const PPQ: u16 = 480;

/// `(delta_ticks, channel, key, on)`
pub type Note = (u32, u8, u8, bool);

fn event(delta: u32, kind: TrackEventKind<'static>) -> TrackEvent<'static> {
    TrackEvent {
        delta: u28::new(delta),
        kind,
    }
}

fn note(delta: u32, channel: u8, key: u8, on: bool) -> TrackEvent<'static> {
    let vel = u7::new(if on { 100 } else { 0 });
    let key = u7::new(key);
    let message = if on {
        MidiMessage::NoteOn { key, vel }
    } else {
        MidiMessage::NoteOff { key, vel }
    };
    event(
        delta,
        TrackEventKind::Midi {
            channel: u4::new(channel),
            message,
        },
    )
}

/// Write a format-1 file: a tempo track, then one track per `tracks` entry
pub fn write_midi(dir: &Path, name: &str, bpm: f64, tracks: &[&[Note]]) -> PathBuf {
    let tempo = u24::new((60_000_000.0 / bpm) as u32);
    let mut smf_tracks = vec![vec![
        event(0, TrackEventKind::Meta(MetaMessage::Tempo(tempo))),
        event(0, TrackEventKind::Meta(MetaMessage::EndOfTrack)),
    ]];

    for notes in tracks {
        let mut events: Vec<_> = notes
            .iter()
            .map(|&(delta, channel, key, on)| note(delta, channel, key, on))
            .collect();
        events.push(event(0, TrackEventKind::Meta(MetaMessage::EndOfTrack)));
        smf_tracks.push(events);
    }

    let smf = Smf {
        header: Header::new(Format::Parallel, Timing::Metrical(u15::new(PPQ))),
        tracks: smf_tracks,
    };
    let path = dir.join(name);
    smf.save(&path).expect("write midi fixture");
    path
}

/// One note on `channel` held for `beats`
pub fn held_note(channel: u8, key: u8, beats: u32) -> Vec<Note> {
    vec![
        (0, channel, key, true),
        (beats * PPQ as u32, channel, key, false),
    ]
}

pub fn test_config() -> PlayerConfig {
    PlayerConfig {
        poll_interval: Duration::from_millis(5),
        block_frames: 256,
        ..PlayerConfig::default()
    }
}

pub fn memory_player() -> MidiPlayer {
    MidiPlayer::with_bank_provider(test_config(), Arc::new(MemoryBank::new("test")))
}

pub fn programs(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

pub async fn next_event(events: &mut EventStream) -> Option<LifecycleEvent> {
    tokio::time::timeout(Duration::from_secs(5), events.next())
        .await
        .expect("lifecycle event within timeout")
}

/// Everything left on the stream, up to its end
pub async fn drain(events: &mut EventStream) -> Vec<LifecycleEvent> {
    let mut seen = Vec::new();
    while let Some(event) = next_event(events).await {
        seen.push(event);
    }
    seen
}

/// Read everything queued on `tap` and return its peak absolute sample
pub fn drain_peak(tap: &mut AudioTap) -> f32 {
    let mut buf = vec![0.0f32; 4096];
    let mut peak = 0.0f32;
    loop {
        let read = tap.read(&mut buf);
        if read == 0 {
            return peak;
        }
        peak = buf[..read].iter().fold(peak, |p, s| p.max(s.abs()));
    }
}
