//! Pipeline-level tests: offline replay, online reordering, and the
//! reader-to-report round trip over a synthesized log file.
//!
//! Run with: `cargo test --test pipeline_replay`

use approx::assert_relative_eq;
use marga_nav::{
    read_events, so3, AntennaConfig, Eskf, EskfOptions, Event, GeoProjector, GnssFix, ImuSample,
    OfflineRunner, OnlinePipeline, PipelineConfig, ReportSinks, TurnConfig, TurnTable,
};
use nalgebra::Vector3;
use std::io::Write;
use std::path::PathBuf;

const IMU_DT: f64 = 0.01;

fn temp_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("marga_replay_{}_{}", tag, std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn test_eskf() -> Eskf {
    let options = EskfOptions {
        imu_dt: IMU_DT,
        gnss_pos_noise: 0.5,
        gnss_height_noise: 0.5,
        ..EskfOptions::default()
    };
    let mut eskf = Eskf::new(options.clone());
    eskf.set_initial(
        options,
        Vector3::zeros(),
        Vector3::zeros(),
        Vector3::new(0.0, 0.0, -9.8),
    );
    eskf
}

fn projector() -> GeoProjector {
    GeoProjector::new(AntennaConfig::default())
}

fn static_imu(t: f64) -> ImuSample {
    ImuSample::new(t, Vector3::zeros(), Vector3::new(0.0, 0.0, 9.8))
}

/// Fix drifting slowly north so the updates actually move the state.
fn drifting_fix(t: f64) -> GnssFix {
    GnssFix::new(
        t,
        4,
        Vector3::new(31.0 + 2e-8 * t, 121.0, 10.0),
        0.0,
        true,
    )
}

/// Build the delivery-order stream for the online pipeline: every GNSS
/// fix is handed over 50 ms (5 IMU periods) before its own timestamp,
/// so it has to wait in the reorder queue. Fix timestamps land exactly
/// on IMU sample times (one fix per 50 samples).
fn online_stream(steps: usize) -> Vec<Event> {
    let mut events = vec![Event::Gnss(drifting_fix(0.0))];
    for i in 1..=steps {
        if (i + 5) % 50 == 0 && i + 5 <= steps {
            events.push(Event::Gnss(drifting_fix((i + 5) as f64 * IMU_DT)));
        }
        events.push(Event::Imu(static_imu(i as f64 * IMU_DT)));
    }
    events
}

/// The same events arranged in true time order, ties broken IMU first —
/// exactly what the offline stable sort settles on.
fn offline_stream(steps: usize) -> Vec<Event> {
    let mut events = vec![Event::Gnss(drifting_fix(0.0))];
    for i in 1..=steps {
        events.push(Event::Imu(static_imu(i as f64 * IMU_DT)));
        if i % 50 == 0 {
            events.push(Event::Gnss(drifting_fix(i as f64 * IMU_DT)));
        }
    }
    events
}

// ============================================================================
// Online reordering matches the offline sort
// ============================================================================

#[test]
fn test_online_reorder_matches_offline() {
    let steps = 1000; // 10 s at 100 Hz

    let offline_dir = temp_dir("equiv_offline");
    let mut offline = OfflineRunner::new(
        test_eskf(),
        projector(),
        PipelineConfig::default(),
        TurnConfig::default(),
        ReportSinks::create(&offline_dir).unwrap(),
    );
    let offline_summary = offline.run(offline_stream(steps)).unwrap();
    let offline_state = offline.nominal();

    let online_dir = temp_dir("equiv_online");
    let mut online = OnlinePipeline::new(
        test_eskf(),
        projector(),
        PipelineConfig::default(),
        TurnTable::empty(),
        ReportSinks::create(&online_dir).unwrap(),
    );
    for event in online_stream(steps) {
        match event {
            Event::Imu(imu) => online.on_imu(&imu).unwrap(),
            Event::Gnss(fix) => online.on_gnss(&fix).unwrap(),
            _ => {}
        }
    }
    let online_state = online.nominal();
    let online_summary = online.finish().unwrap();

    // Every fix applied exactly once, none dropped, in both modes
    assert_eq!(offline_summary.gnss_applied, online_summary.gnss_applied);
    assert_eq!(online_summary.gnss_dropped, 0);
    assert_eq!(offline_summary.imu_integrated, online_summary.imu_integrated);

    // Final states agree to numerical precision
    assert!((offline_state.p - online_state.p).norm() < 1e-6);
    assert!((offline_state.v - online_state.v).norm() < 1e-6);
    assert!(
        so3::log(&(offline_state.rotation.inverse() * online_state.rotation)).norm() < 1e-6
    );
    assert!((offline_state.bg - online_state.bg).norm() < 1e-6);
    assert!((offline_state.ba - online_state.ba).norm() < 1e-6);
    assert_relative_eq!(offline_state.t, online_state.t, epsilon = 1e-9);

    std::fs::remove_dir_all(&offline_dir).ok();
    std::fs::remove_dir_all(&online_dir).ok();
}

// ============================================================================
// Reader -> pipeline -> report round trip
// ============================================================================

#[test]
fn test_log_file_replay_end_to_end() {
    let dir = temp_dir("endtoend");
    let log_path = dir.join("drive.log");

    // Synthesize a 20 s stationary log in the plain record format
    let mut log = std::fs::File::create(&log_path).unwrap();
    writeln!(log, "# synthetic stationary drive").unwrap();
    writeln!(log, "GNSS 1000.0 31.0 121.0 10.0 90.0 1").unwrap();
    for i in 1..=2000 {
        let t = 1000.0 + i as f64 * IMU_DT;
        writeln!(log, "IMU {:.3} 0 0 0 0 0 9.8", t).unwrap();
        if i % 100 == 0 {
            writeln!(log, "GNSS {:.3} 31.0 121.0 10.0 90.0 1", t).unwrap();
        }
    }
    drop(log);

    let events = read_events(&log_path).unwrap();
    assert_eq!(events.len(), 2021);

    let out_dir = dir.join("output");
    let mut runner = OfflineRunner::new(
        test_eskf(),
        projector(),
        PipelineConfig::default(),
        TurnConfig::default(),
        ReportSinks::create(&out_dir).unwrap(),
    );
    let summary = runner.run(events).unwrap();

    assert_eq!(summary.imu_integrated, 2000);
    assert_eq!(summary.gnss_applied, 21);
    assert_eq!(summary.gnss_dropped, 0);

    // Stationary truth: the solution stays at the origin
    let state = runner.nominal();
    assert!(state.p.norm() < 0.5, "drifted {} m", state.p.norm());
    assert!(state.v.norm() < 0.2);

    // All four report files materialized
    let state_trace = std::fs::read_to_string(out_dir.join("gins_state.txt")).unwrap();
    assert_eq!(state_trace.lines().count(), 2021);
    let cov_trace = std::fs::read_to_string(out_dir.join("gins_cov.txt")).unwrap();
    assert_eq!(cov_trace.lines().count(), 2000);
    let residuals = std::fs::read_to_string(out_dir.join("gins_residuals.txt")).unwrap();
    assert_eq!(residuals.lines().count(), 20);
    let turns = std::fs::read_to_string(out_dir.join("turn_segments.csv")).unwrap();
    assert!(turns.starts_with('#'));

    std::fs::remove_dir_all(&dir).ok();
}

// ============================================================================
// Turn routing: fixes inside detected turns go position-only
// ============================================================================

#[test]
fn test_offline_turn_routing() {
    let dir = temp_dir("turnroute");

    // 60 s at 1 Hz GNSS: a 90 degree right turn between t = 20 and t = 29
    let mut events = Vec::new();
    events.push(Event::Gnss(heading_fix(0.0, 90.0)));
    let mut heading: f64 = 90.0;
    for i in 1..=6000 {
        let t = i as f64 * IMU_DT;
        let turning = (20.0..29.0).contains(&t);
        let gyro_z = if turning { -10.0f64.to_radians() } else { 0.0 };
        // Compass heading grows clockwise, ENU yaw shrinks
        let rotation = so3::yaw_rotation((90.0 - heading).to_radians());
        events.push(Event::Imu(ImuSample::new(
            t,
            Vector3::new(0.0, 0.0, gyro_z),
            rotation.inverse() * Vector3::new(0.0, 0.0, 9.8),
        )));
        if turning {
            heading += 10.0 * IMU_DT;
        }
        if i % 100 == 0 {
            events.push(Event::Gnss(heading_fix(t, heading)));
        }
    }

    let mut runner = OfflineRunner::new(
        test_eskf(),
        projector(),
        PipelineConfig::default(),
        TurnConfig::default(),
        ReportSinks::create(&dir).unwrap(),
    );
    let summary = runner.run(events).unwrap();

    // The turn was detected and some fixes were routed position-only
    assert!(summary.gnss_position_only > 0);
    assert!(summary.gnss_position_only < summary.gnss_applied);

    let turns = std::fs::read_to_string(dir.join("turn_segments.csv")).unwrap();
    let data_lines: Vec<&str> = turns.lines().filter(|l| !l.starts_with('#')).collect();
    assert_eq!(data_lines.len(), 1);
    assert!(data_lines[0].contains("right"));

    std::fs::remove_dir_all(&dir).ok();
}

fn heading_fix(t: f64, heading_deg: f64) -> GnssFix {
    GnssFix::new(t, 4, Vector3::new(31.0, 121.0, 10.0), heading_deg, true)
}
