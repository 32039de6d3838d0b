use std::sync::Arc;

use dotmatrix_core::engine::{CoreEngine, EngineError, FRAME_LEN};
use dotmatrix_core::handle::EmulatorHandle;
use dotmatrix_core::input::InputMask;
use dotmatrix_engines::pattern::cartridge_title;
use dotmatrix_engines::{Instrumented, PatternEngine, registry};
use pretty_assertions::assert_eq;
mod common;
use common::cartridge;

fn handle(rom: Vec<u8>) -> EmulatorHandle {
    EmulatorHandle::create(Box::new(PatternEngine::new()), Arc::from(rom)).unwrap()
}

// =================================================================
// ROM validation
// =================================================================

#[test]
fn accepts_valid_header() {
    let mut engine = PatternEngine::new();
    let instance = engine.create_instance(&cartridge("TETRIS")).unwrap();
    assert_eq!(engine.live_instances(), 1);
    engine.release_instance(instance);
    assert_eq!(engine.live_instances(), 0);
}

#[test]
fn rejects_bad_checksum() {
    let mut rom = cartridge("TETRIS");
    rom[0x14D] ^= 0xFF;
    let err = PatternEngine::new().create_instance(&rom).unwrap_err();
    assert!(matches!(err, EngineError::InvalidRom(msg) if msg.contains("checksum")));
}

#[test]
fn rejects_truncated_image() {
    let err = PatternEngine::new().create_instance(&[0u8; 0x100]).unwrap_err();
    assert!(matches!(err, EngineError::InvalidRom(_)));
}

#[test]
fn reads_title() {
    assert_eq!(cartridge_title(&cartridge("POKEMON RED")).as_deref(), Some("POKEMON RED"));
}

// =================================================================
// Frames
// =================================================================

#[test]
fn frames_are_full_size_and_opaque() {
    let mut handle = handle(cartridge("TETRIS"));
    let frame = handle.advance_frame(InputMask::NONE);
    assert_eq!(frame.len(), FRAME_LEN);
    assert!(frame.chunks_exact(4).all(|px| px[3] == 0xFF));
}

#[test]
fn consecutive_frames_differ() {
    let mut handle = handle(cartridge("TETRIS"));
    let first = handle.advance_frame(InputMask::NONE).to_vec();
    let second = handle.advance_frame(InputMask::NONE).to_vec();
    assert_ne!(first, second);
}

#[test]
fn same_cartridge_same_inputs_same_frames() {
    let inputs = [0x00, 0x10, 0x11, 0x80, 0x00, 0x42];
    let run = || {
        let mut handle = handle(cartridge("TETRIS"));
        inputs
            .iter()
            .map(|&bits| handle.advance_frame(InputMask::from_bits(bits)).to_vec())
            .collect::<Vec<_>>()
    };
    assert_eq!(run(), run());
}

// =================================================================
// Savestates
// =================================================================

#[test]
fn dump_load_on_reset_instance_replays_identically() {
    let mut handle = handle(cartridge("TETRIS"));
    for bits in [0x10, 0x10, 0x41, 0x00] {
        handle.advance_frame(InputMask::from_bits(bits));
    }
    let state = handle.dump_state().unwrap().state;
    let script = [0x20u8, 0x21, 0x80, 0x00, 0x08];
    let expected: Vec<Vec<u8>> = script
        .iter()
        .map(|&bits| handle.advance_frame(InputMask::from_bits(bits)).to_vec())
        .collect();

    handle.reset();
    handle.load_state(&state).unwrap();
    let replayed: Vec<Vec<u8>> = script
        .iter()
        .map(|&bits| handle.advance_frame(InputMask::from_bits(bits)).to_vec())
        .collect();

    assert!(expected == replayed, "replay diverged after load");
}

#[test]
fn savestate_from_other_cartridge_rejected() {
    let mut tetris = handle(cartridge("TETRIS"));
    tetris.advance_frame(InputMask::NONE);
    let state = tetris.dump_state().unwrap().state;

    let mut zelda = handle(cartridge("ZELDA"));
    let err = zelda.load_state(&state).unwrap_err();
    assert!(matches!(err, EngineError::InvalidSavestate(_)));
}

#[test]
fn reset_returns_to_power_on() {
    let mut handle = handle(cartridge("TETRIS"));
    let first = handle.advance_frame(InputMask::NONE).to_vec();
    for _ in 0..10 {
        handle.advance_frame(InputMask::from_bits(0x10));
    }
    handle.reset();
    assert!(handle.advance_frame(InputMask::NONE) == first.as_slice());
}

#[test]
fn garbage_savestate_rejected_and_rolled_back() {
    let mut handle = handle(cartridge("TETRIS"));
    handle.advance_frame(InputMask::NONE);
    let before = handle.dump_state().unwrap().state;

    assert!(handle.load_state(b"DMPS but much too short").is_err());

    assert_eq!(handle.dump_state().unwrap().state, before);
}

// =================================================================
// Instrumentation
// =================================================================

#[test]
fn instrumented_counts_buffer_traffic() {
    let engine = Instrumented::new(PatternEngine::new());
    let stats = engine.stats();
    let mut handle =
        EmulatorHandle::create(Box::new(engine), Arc::from(cartridge("TETRIS"))).unwrap();

    for _ in 0..5 {
        handle.advance_frame(InputMask::NONE);
    }
    let during = stats.snapshot();
    assert_eq!(during.buffers_produced, 5);
    assert_eq!(during.live_buffers(), 1);
    assert_eq!(during.live_instances(), 1);

    assert!(handle.load_state(&[1, 2, 3]).is_err());
    handle.close();

    let after = stats.snapshot();
    assert_eq!(after.live_buffers(), 0);
    assert_eq!(after.live_instances(), 0);
    assert_eq!(after.failed_loads, 1);
    // Rollback snapshot plus the rejected load and the restore.
    assert_eq!(after.dumps, 1);
    assert_eq!(after.loads, 2);
}

#[test]
fn rejected_rom_is_not_counted() {
    let mut engine = Instrumented::new(PatternEngine::new());
    let stats = engine.stats();
    assert!(engine.create_instance(&[0u8; 16]).is_err());
    assert_eq!(stats.snapshot().instances_created, 0);
}

// =================================================================
// Registry
// =================================================================

#[test]
fn registry_lists_pattern_engine() {
    let names: Vec<_> = registry::all().iter().map(|e| e.name).collect();
    assert!(names.contains(&"pattern"));

    let entry = registry::find("pattern").unwrap();
    let engine = (entry.create)();
    assert_eq!(engine.name(), "pattern");
    assert!(registry::find("no-such-engine").is_none());
}
