use std::error::Error;

use aqua_feeding::app::get_default_db_path;
use aqua_feeding::config::{config_keys, ConfigManager};
use aqua_feeding::domain::{ContinuousCalibration, DoserCalibration, PulseCalibration};
use aqua_feeding::repository::EquipmentRepository;
use aqua_feeding::DosingTranslator;

// 演示产线: L1 为脉冲式下料器，L2 为连续式下料器
const PULSE_LINE: &str = "L1";
const CONTINUOUS_LINE: &str = "L2";
const CAGES_PER_LINE: u32 = 8;

fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    let db_path = std::env::args().nth(1).unwrap_or_else(get_default_db_path);
    println!("seed db: {}", db_path);

    let equipment = EquipmentRepository::new(&db_path)?;
    let config = ConfigManager::new(&db_path)?;

    let pulse = DoserCalibration::Pulse(PulseCalibration {
        pulse_on_time_s: 0.5,
        base_pulse_off_time_s: 1.5,
        operating_speed_pct: 80.0,
        grams_per_pulse: 250.0,
        min_pulse_off_time_s: 0.25,
    });
    let continuous = DoserCalibration::Continuous(ContinuousCalibration {
        rated_flow_kg_min: 30.0,
        max_motor_speed_rpm: 1450.0,
    });

    seed_line(&equipment, PULSE_LINE, &pulse)?;
    seed_line(&equipment, CONTINUOUS_LINE, &continuous)?;

    // 演示环境使用较短的轮询周期
    config.set_global_config_value(config_keys::POLL_INTERVAL_MS, "500")?;
    config.set_global_config_value(config_keys::HARDWARE_TIMEOUT_MS, "2000")?;

    println!("done.");
    Ok(())
}

fn seed_line(
    equipment: &EquipmentRepository,
    line_id: &str,
    calibration: &DoserCalibration,
) -> Result<(), Box<dyn Error + Send + Sync>> {
    equipment.upsert_calibration(line_id, calibration)?;
    for slot in 1..=CAGES_PER_LINE {
        let cage_id = format!("{}-C{:02}", line_id, slot);
        equipment.upsert_cage_slot(line_id, &cage_id, slot)?;
    }

    let capacity = DosingTranslator::new().capacity(calibration);
    println!(
        "line {}: {} doser, {} cages, capacity {:.1} kg/min",
        line_id,
        calibration.kind(),
        CAGES_PER_LINE,
        capacity
    );
    Ok(())
}
