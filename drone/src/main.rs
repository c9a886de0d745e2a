use std::sync::atomic::AtomicBool;
use std::sync::mpsc::sync_channel;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use signal_hook::consts::{SIGINT, SIGTERM};
use thread_priority::{
    RealtimeThreadSchedulePolicy, ScheduleParams, ThreadBuilder, ThreadPriority, ThreadSchedulePolicy
};

use quadpilot::config::QuadParameters;
use quadpilot::esc::PulseEsc;
use quadpilot::flight_controller::FlightController;
use quadpilot::link::UdpLink;
use quadpilot::log::Logger;
use quadpilot::mock;
use quadpilot::storage::FileStorage;

fn main() -> Result<()> {
    let params = QuadParameters::load()?;
    let mut log_sink = Logger::init(params.runtime.log_filter()?);

    let shutdown = Arc::new(AtomicBool::new(false));
    for signal in [SIGINT, SIGTERM] {
        signal_hook::flag::register(signal, Arc::clone(&shutdown)).context("Cannot register signal handler")?;
    }

    let (imu_tx, imu_rx) = sync_channel(8);
    let imu = {
        let shutdown = Arc::clone(&shutdown);
        let scale = params.sensor;
        let period = Duration::from_millis(params.runtime.imu_period_ms);
        thread::Builder::new()
            .name("imu".into())
            .spawn(move || mock::imu(imu_tx, scale, period, shutdown))
            .context("Cannot spawn imu thread")?
    };

    let storage = FileStorage::open(&params.calibration.storage)?;
    let link = UdpLink::bind(params.runtime.link)?;
    let mut controller = FlightController::new(&params, storage, link, PulseEsc::default(), imu_rx);

    let controller = {
        let shutdown = Arc::clone(&shutdown);
        ThreadBuilder::default()
            .name("controller")
            .policy(ThreadSchedulePolicy::Realtime(RealtimeThreadSchedulePolicy::Fifo))
            .priority(ThreadPriority::from_posix(ScheduleParams {
                sched_priority: 40,
            }))
            .spawn_careless(move || controller.run(&shutdown))
            .context("Cannot spawn controller thread")?
    };

    while !controller.is_finished() {
        log_sink.handle_logs();
        thread::sleep(Duration::from_millis(10));
    }

    let result = controller.join().map_err(|_| anyhow!("Controller thread panicked"))?;
    if let Err(e) = &result {
        log::error!("{:#}", e);
    }
    let _ = imu.join();
    log_sink.handle_logs();
    result
}
