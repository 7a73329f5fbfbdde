use nalgebra::Vector3;
use tiltsense_drivers::dummy::{NoDelay, SimulatedMpu6050};
use tiltsense_drivers::imu::mpu6050::{
    CalibrationSettings, OffsetSeed, Signature, registers,
};
use tiltsense_drivers::{Mpu6050, Mpu6050Config};
use tiltsense_hal::dummy::{FreeRunningSignal, RamStorage};
use tiltsense_hal::imu::{Axis, DeviceState, ImuError, MotionSensor};

type Storage = RamStorage<64>;
type Driver<'a> = Mpu6050<&'a mut SimulatedMpu6050, NoDelay, FreeRunningSignal, Storage>;

fn driver(sim: &mut SimulatedMpu6050, storage: Storage, config: Mpu6050Config) -> Driver<'_> {
    Mpu6050::new(
        sim,
        NoDelay::default(),
        FreeRunningSignal::new(0, 1),
        storage,
        config,
    )
}

/// Run both initialization phases and hand back the storage
fn initialize(sim: &mut SimulatedMpu6050, storage: Storage) -> ([i16; 6], Storage) {
    let mut imu = driver(sim, storage, Mpu6050Config::default());
    imu.initialize_phase1().unwrap();
    imu.initialize_phase2().unwrap();
    assert_eq!(imu.state(), DeviceState::Correct);
    let offsets = imu.offsets();
    let (_, _, _, store) = imu.release();
    (offsets, store.release())
}

#[test]
fn phase1_configures_and_requests_calibration_on_blank_storage() {
    let mut sim = SimulatedMpu6050::new();
    let mut imu = driver(&mut sim, Storage::new(), Mpu6050Config::default());

    imu.initialize_phase1().unwrap();
    assert_eq!(imu.state(), DeviceState::NotCalibrated);
    drop(imu);

    assert!(!sim.is_sleeping());
    // gyro-Z PLL clock, awake
    assert_eq!(sim.register(registers::PWR_MGMT_1), 0x03);
    assert_eq!(sim.register(registers::ACCEL_CONFIG), 0x10);
    assert_eq!(sim.register(registers::GYRO_CONFIG), 0x10);
    assert_eq!(sim.register(registers::CONFIG), 0x02);
    assert_eq!(sim.register(registers::INT_ENABLE), 0x01);
    assert_eq!(sim.register(registers::SMPLRT_DIV), 0x1F);
}

#[test]
fn full_initialization_calibrates_and_persists() {
    let mut sim = SimulatedMpu6050::new();
    let mut imu = driver(&mut sim, Storage::new(), Mpu6050Config::default());

    imu.initialize_phase1().unwrap();
    imu.initialize_phase2().unwrap();
    assert_eq!(imu.state(), DeviceState::Correct);

    let refined = imu.refined_sample().unwrap();
    assert!((refined.accel - Vector3::new(0.0, 0.0, 1.0)).norm() < 1e-3);
    assert!(refined.gyro.norm() < 1e-3);

    let offsets = imu.offsets();
    assert_ne!(offsets, [0; 6]);
    assert_eq!(imu.store().signature(), Ok(Signature::Complete));
    let record = imu.store().load().unwrap().unwrap();
    assert_eq!(record.offsets, offsets);
    assert!((record.temperature - 30.0).abs() < 0.01);
    drop(imu);

    assert_eq!(sim.hardware_offsets(), offsets);
    // working setup restored after the fast correction pass
    assert_eq!(sim.register(registers::SMPLRT_DIV), 0x1F);
    assert_eq!(sim.register(registers::CONFIG), 0x02);
    assert!(sim.signal_path_resets() >= 3);
}

#[test]
fn stored_calibration_is_reused_after_power_cycle() {
    let mut sim = SimulatedMpu6050::new();
    let (offsets, storage) = initialize(&mut sim, Storage::new());
    let writes = storage.writes();

    // fresh power-on: offset registers are back to zero
    let mut sim = SimulatedMpu6050::new();
    let mut imu = driver(&mut sim, storage, Mpu6050Config::default());
    imu.initialize_phase1().unwrap();
    assert_eq!(imu.state(), DeviceState::NotInitialized);
    assert_eq!(imu.offsets(), offsets);

    imu.initialize_phase2().unwrap();
    assert_eq!(imu.state(), DeviceState::Correct);
    assert_eq!(imu.store().storage().writes(), writes);
    drop(imu);

    assert_eq!(sim.hardware_offsets(), offsets);
}

#[test]
fn temperature_drift_forces_recalibration() {
    let mut sim = SimulatedMpu6050::new();
    let (_, storage) = initialize(&mut sim, Storage::new());

    let mut sim = SimulatedMpu6050::new();
    sim.set_temperature(60.0);
    let mut imu = driver(&mut sim, storage, Mpu6050Config::default());
    imu.initialize_phase1().unwrap();
    assert_eq!(imu.state(), DeviceState::NotCalibrated);

    imu.initialize_phase2().unwrap();
    let record = imu.store().load().unwrap().unwrap();
    assert!((record.temperature - 60.0).abs() < 0.01);
}

#[test]
fn interrupted_save_is_not_trusted() {
    let mut sim = SimulatedMpu6050::new();
    let (_, mut storage) = initialize(&mut sim, Storage::new());

    // signature left at "writing", payload intact
    storage.cells_mut()[15] = 0xD0;
    let mut sim = SimulatedMpu6050::new();
    let mut imu = driver(&mut sim, storage, Mpu6050Config::default());
    imu.initialize_phase1().unwrap();
    assert_eq!(imu.state(), DeviceState::NotCalibrated);
}

#[test]
fn failed_save_keeps_session_calibration() {
    let mut storage = Storage::new();
    storage.cut_power_after(0);

    let mut sim = SimulatedMpu6050::new();
    let mut imu = driver(&mut sim, storage, Mpu6050Config::default());
    imu.initialize_phase1().unwrap();
    imu.initialize_phase2().unwrap();

    assert_eq!(imu.state(), DeviceState::Correct);
    assert_eq!(imu.store().load(), Ok(None));
    assert!((imu.refined_sample().unwrap().accel.z - 1.0).abs() < 1e-3);
}

#[test]
fn self_test_failure_is_sticky_until_next_phase1() {
    let mut sim = SimulatedMpu6050::new();
    sim.set_self_test_scale(Axis::GyroY, 0.5);
    let mut imu = driver(&mut sim, Storage::new(), Mpu6050Config::default());

    assert_eq!(
        imu.initialize_phase1(),
        Err(ImuError::SelfTestFailed(Axis::GyroY))
    );
    assert_eq!(imu.state(), DeviceState::SelfTestFailed(Axis::GyroY));
    assert_eq!(imu.state().code(), 7);
    assert_eq!(
        imu.initialize_phase2(),
        Err(ImuError::NotReady(DeviceState::SelfTestFailed(Axis::GyroY)))
    );
    assert_eq!(
        MotionSensor::calibrate(&mut imu),
        Err(ImuError::NotReady(DeviceState::SelfTestFailed(Axis::GyroY)))
    );

    imu.i2c_mut().set_self_test_scale(Axis::GyroY, 1.0);
    imu.initialize_phase1().unwrap();
    assert_eq!(imu.state(), DeviceState::NotCalibrated);
}

#[test]
fn self_test_leaves_sensor_out_of_test_mode() {
    let mut sim = SimulatedMpu6050::new();
    let mut imu = driver(&mut sim, Storage::new(), Mpu6050Config::default());
    imu.set_low_power_mode(false).unwrap();

    let report = imu.run_self_test().unwrap();
    assert!(report.passed());
    assert!(report.deviation.iter().all(|d| d.unwrap() < 1.0));
    drop(imu);

    assert_eq!(sim.register(registers::ACCEL_CONFIG), 0x10);
    assert_eq!(sim.register(registers::GYRO_CONFIG), 0x00);
}

#[test]
fn unexpected_device_is_rejected() {
    let mut sim = SimulatedMpu6050::new();
    sim.set_register(registers::WHO_AM_I, 0x70);
    let mut imu = driver(&mut sim, Storage::new(), Mpu6050Config::default());

    assert_eq!(
        imu.initialize_phase1(),
        Err(ImuError::UnexpectedDevice { id: 0x70 })
    );
    assert_eq!(imu.state(), DeviceState::I2cError);
}

#[test]
fn alternate_address_is_used() {
    let mut sim = SimulatedMpu6050::new().with_address(0x69);
    let config = Mpu6050Config::default().with_address(0x69);
    let mut imu = driver(&mut sim, Storage::new(), config);

    imu.initialize_phase1().unwrap();
    assert_eq!(imu.state(), DeviceState::NotCalibrated);
}

#[test]
fn dead_bus_ends_in_i2c_error() {
    let mut sim = SimulatedMpu6050::new();
    sim.fail_next(u32::MAX);
    let mut imu = driver(&mut sim, Storage::new(), Mpu6050Config::default());

    assert_eq!(imu.initialize_phase1(), Err(ImuError::Communication));
    assert_eq!(imu.state(), DeviceState::I2cError);
    assert_eq!(imu.state().code(), 2);
}

#[test]
fn exhausted_budget_is_a_calibration_error() {
    let settings = CalibrationSettings {
        max_iterations: 3,
        ..CalibrationSettings::default()
    };
    let mut sim = SimulatedMpu6050::new();
    let config = Mpu6050Config::default().with_calibration(settings);
    let mut imu = driver(&mut sim, Storage::new(), config);

    imu.initialize_phase1().unwrap();
    assert_eq!(
        imu.initialize_phase2(),
        Err(ImuError::CalibrationExhausted)
    );
    assert_eq!(imu.state(), DeviceState::CalibrationError);
    assert_eq!(imu.state().code(), 10);
    assert_eq!(imu.store().signature(), Ok(Signature::Empty));
}

#[test]
fn seeding_from_registers_finds_same_offsets() {
    let mut sim = SimulatedMpu6050::new();
    let (expected, _) = initialize(&mut sim, Storage::new());

    // registers still hold the previous result
    let settings = CalibrationSettings {
        seed: OffsetSeed::Registers,
        ..CalibrationSettings::default()
    };
    let config = Mpu6050Config::default().with_calibration(settings);
    let mut imu = driver(&mut sim, Storage::new(), config);
    imu.prepare_calibration().unwrap();
    let (outcome, persisted) = imu.perform_calibration().unwrap();

    assert!(persisted);
    assert_eq!(outcome.offsets, expected);
}

#[test]
fn recalibration_through_motion_sensor() {
    let mut sim = SimulatedMpu6050::new();
    let mut imu = driver(&mut sim, Storage::new(), Mpu6050Config::default());
    imu.initialize_phase1().unwrap();
    imu.initialize_phase2().unwrap();
    let before = imu.offsets();

    imu.i2c_mut().set_accel_bias(Vector3::new(-0.04, 0.01, -0.02));
    MotionSensor::calibrate(&mut imu).unwrap();

    assert_eq!(imu.state(), DeviceState::Correct);
    assert_ne!(imu.offsets(), before);
    assert_eq!(imu.store().load().unwrap().unwrap().offsets, imu.offsets());
    assert!((imu.refined_sample().unwrap().accel.z - 1.0).abs() < 1e-3);
}

#[test]
fn calibrate_requires_initialization() {
    let mut sim = SimulatedMpu6050::new();
    let mut imu = driver(&mut sim, Storage::new(), Mpu6050Config::default());
    assert_eq!(
        MotionSensor::calibrate(&mut imu),
        Err(ImuError::NotReady(DeviceState::NotInitialized))
    );
}

#[test]
fn phase2_requires_successful_phase1() {
    let mut sim = SimulatedMpu6050::new();
    // would fail self-test if phase 1 ran
    sim.set_self_test_scale(Axis::AccelX, 0.1);
    let mut imu = driver(&mut sim, Storage::new(), Mpu6050Config::default());

    assert_eq!(
        imu.initialize_phase2(),
        Err(ImuError::NotReady(DeviceState::NotInitialized))
    );
    assert_ne!(imu.state(), DeviceState::Correct);
    drop(imu);
    assert_eq!(sim.writes().count(), 0);
}

#[test]
fn phase2_is_refused_after_failed_phase1() {
    let mut sim = SimulatedMpu6050::new();
    let (_, storage) = initialize(&mut sim, Storage::new());

    // stored calibration is fresh, but the part now fails its self-test
    let mut sim = SimulatedMpu6050::new();
    sim.set_self_test_scale(Axis::AccelX, 0.1);
    let mut imu = driver(&mut sim, storage, Mpu6050Config::default());
    assert_eq!(
        imu.initialize_phase1(),
        Err(ImuError::SelfTestFailed(Axis::AccelX))
    );
    assert!(imu.initialize_phase2().is_err());
    assert_ne!(imu.state(), DeviceState::Correct);
}

#[test]
fn calibrate_replaces_fresh_stored_calibration() {
    let mut sim = SimulatedMpu6050::new();
    let (_, storage) = initialize(&mut sim, Storage::new());
    let writes = storage.writes();

    let mut sim = SimulatedMpu6050::new();
    let mut imu = driver(&mut sim, storage, Mpu6050Config::default());
    imu.initialize_phase1().unwrap();
    assert_eq!(imu.state(), DeviceState::NotInitialized);

    MotionSensor::calibrate(&mut imu).unwrap();
    assert_eq!(imu.state(), DeviceState::Correct);
    assert!(imu.store().storage().writes() > writes);
}

#[test]
fn offsets_round_trip_through_registers() {
    let mut sim = SimulatedMpu6050::new();
    let mut imu = driver(&mut sim, Storage::new(), Mpu6050Config::default());

    let offsets = [-1520, 873, 1288, 41, -17, 9];
    imu.set_offsets(&offsets).unwrap();
    assert_eq!(imu.read_offsets(), Ok(offsets));
    drop(imu);
    assert_eq!(sim.hardware_offsets(), offsets);
}

#[test]
fn sleep_and_wake() {
    let mut sim = SimulatedMpu6050::new();
    let mut imu = driver(&mut sim, Storage::new(), Mpu6050Config::default());

    imu.set_low_power_mode(false).unwrap();
    assert!(!imu.i2c_mut().is_sleeping());
    imu.set_low_power_mode(true).unwrap();
    assert!(imu.i2c_mut().is_sleeping());
}

#[test]
fn temperature_is_converted_to_celsius() {
    let mut sim = SimulatedMpu6050::new();
    sim.set_temperature(24.0);
    let mut imu = driver(&mut sim, Storage::new(), Mpu6050Config::default());
    // measurements read as zero while asleep
    imu.set_low_power_mode(false).unwrap();
    assert!((imu.temperature().unwrap() - 24.0).abs() < 0.01);
}

#[test]
fn signal_path_reset_is_not_verified() {
    let mut sim = SimulatedMpu6050::new();
    let mut imu = driver(&mut sim, Storage::new(), Mpu6050Config::default());

    imu.reset_signal_path().unwrap();
    assert_eq!(imu.state(), DeviceState::NotInitialized);
    drop(imu);
    assert_eq!(sim.signal_path_resets(), 1);
}
