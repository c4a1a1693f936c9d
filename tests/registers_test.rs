use chrono::{TimeZone, Utc};
use gridcon::registers::{
    AC_IPU_PARAMETER_STARTS, AcIpuParameters, CCU_STATUS_BLOCK, CcuParameters, CcuStatus,
    CommandBlock, CommandMirror, DCDC_MEASUREMENT_BLOCKS, DcdcMeasurements, DcdcParameters,
    IPU_STATUS_BLOCKS, IpuStatus, PControlMode, Priority, WriteImage, decode_f32, decode_u32,
    encode_f32, encode_sync_date, encode_sync_time, encode_u32,
};

#[test]
fn read_block_layout() {
    assert_eq!(CCU_STATUS_BLOCK.start, 32528);
    assert_eq!(CCU_STATUS_BLOCK.count, 22);
    assert_eq!(CCU_STATUS_BLOCK.priority, Priority::High);

    let ipu_starts: Vec<u16> = IPU_STATUS_BLOCKS.iter().map(|b| b.start).collect();
    assert_eq!(ipu_starts, vec![33168, 33200, 33232, 33264]);
    let dcdc_starts: Vec<u16> = DCDC_MEASUREMENT_BLOCKS.iter().map(|b| b.start).collect();
    assert_eq!(dcdc_starts, vec![33488, 33520, 33552, 33584]);
    assert!(IPU_STATUS_BLOCKS.iter().all(|b| b.count == 32));
}

#[test]
fn write_blocks_are_contiguous() {
    // Command (16) ends where the CCU parameter block begins, the three
    // AC IPU blocks follow back to back
    assert_eq!(CommandBlock::START + 16, CcuParameters::START);
    assert_eq!(CcuParameters::START + 32, AC_IPU_PARAMETER_STARTS[0]);
    assert_eq!(AC_IPU_PARAMETER_STARTS[0] + 16, AC_IPU_PARAMETER_STARTS[1]);
    assert_eq!(AC_IPU_PARAMETER_STARTS[1] + 16, AC_IPU_PARAMETER_STARTS[2]);
    assert_eq!(AC_IPU_PARAMETER_STARTS[2] + 16, DcdcParameters::START);
}

#[test]
fn status_decode_matches_command_encode() {
    // Build a full status block from encoded doublewords and decode it
    let mut regs = vec![0u16; 22];
    regs[0..2].copy_from_slice(&encode_u32(1 << 3)); // READY
    regs[2..4].copy_from_slice(&encode_u32(0x00BE_EF00));
    regs[16..18].copy_from_slice(&encode_f32(-42_000.0)); // P
    regs[18..20].copy_from_slice(&encode_f32(5_000.0)); // Q
    regs[20..22].copy_from_slice(&encode_f32(0.9996));

    let status = CcuStatus::from_registers(&regs).unwrap();
    assert_eq!(status.state_bits, 1 << 3);
    assert_eq!(status.error_code, 0x00BE_EF00);
    assert_eq!(status.power_p, -42_000.0);
    assert_eq!(status.power_q, 5_000.0);
    assert!((status.frequency - 0.9996).abs() < 1e-6);
}

#[test]
fn ipu_status_full_decode() {
    let mut regs = vec![0u16; 32];
    regs[0..2].copy_from_slice(&encode_u32(0x0000_020B));
    regs[4..6].copy_from_slice(&encode_f32(402.5)); // DC link positive
    regs[10..12].copy_from_slice(&encode_f32(-15_500.0)); // active power
    regs[14..16].copy_from_slice(&encode_u32(3200)); // fan max
    regs[18..20].copy_from_slice(&encode_f32(61.5)); // IGBT temp

    let status = IpuStatus::from_registers(&regs).unwrap();
    assert_eq!(status.state_machine, 0x0B);
    assert_eq!(status.mcu, 0x02);
    assert_eq!(status.dc_link_positive_voltage, 402.5);
    assert_eq!(status.dc_link_active_power, -15_500.0);
    assert_eq!(status.fan_speed_max, 3200);
    assert_eq!(status.temperature_igbt_max, 61.5);
}

#[test]
fn dcdc_measurement_full_decode() {
    let mut regs = vec![0u16; 32];
    for (i, value) in (0..16).map(|i| (i, i as f32 * 10.0)) {
        regs[2 * i..2 * i + 2].copy_from_slice(&encode_f32(value));
    }
    let m = DcdcMeasurements::from_registers(&regs).unwrap();
    assert_eq!(m.voltage_string_a, 0.0);
    assert_eq!(m.current_string_a, 30.0);
    assert_eq!(m.power_string_c, 80.0);
    assert_eq!(m.accumulated_sum_dc_current, 120.0);
    assert_eq!(m.reserve_2, 150.0);
}

#[test]
fn command_block_round_trips_through_the_mirror() {
    let now = Utc.with_ymd_and_hms(2025, 11, 17, 8, 4, 59).unwrap();
    let block = CommandBlock {
        control_word: (1 << 0) | (1 << 5) | (1 << 7),
        error_code_feedback: 0,
        u0: 1.0,
        f0: 1.0008,
        q_ref: -0.1,
        p_ref: 0.4,
        sync_date: encode_sync_date(&now),
        sync_time: encode_sync_time(&now),
    };
    let regs = block.to_registers();
    let mirror = CommandMirror::from_registers(&regs[0..12]).unwrap();
    assert_eq!(mirror.control_word, block.control_word);
    assert!((mirror.p_ref - 0.4).abs() < 1e-6);
    assert!((mirror.q_ref - (-0.1)).abs() < 1e-6);
    assert!((mirror.f0 - 1.0008).abs() < 1e-6);
}

#[test]
fn sync_date_monday_is_zero() {
    // 2024-01-01 was a Monday
    let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let date = encode_sync_date(&t);
    assert_eq!(date & 0xFF, 1);
    assert_eq!((date >> 8) & 0xFF, 0);
    assert_eq!((date >> 16) & 0xFF, 24);
    assert_eq!((date >> 24) & 0xFF, 1);
}

#[test]
fn parameter_blocks_serialize_every_field() {
    let ac = AcIpuParameters {
        dc_voltage_setpoint: 800.0,
        p_max_discharge: -86_000.0,
        p_max_charge: 86_000.0,
        ..AcIpuParameters::default()
    };
    let regs = ac.to_registers();
    assert_eq!(decode_f32(&regs[0..2]).unwrap(), 800.0);
    assert_eq!(decode_f32(&regs[12..14]).unwrap(), -86_000.0);
    assert_eq!(decode_f32(&regs[14..16]).unwrap(), 86_000.0);

    let ccu = CcuParameters::baseline(PControlMode::ActivePowerControl);
    let regs = ccu.to_registers();
    assert_eq!(decode_f32(&regs[26..28]).unwrap(), 1.0);
    assert!(regs[0..26].iter().all(|&r| r == 0));

    let dcdc = DcdcParameters {
        dc_voltage_setpoint: 800.0,
        weight_string_a: 70.0,
        string_control_mode: 73.0,
        ..DcdcParameters::default()
    };
    let regs = dcdc.to_registers();
    assert_eq!(decode_f32(&regs[2..4]).unwrap(), 70.0);
    assert_eq!(decode_f32(&regs[14..16]).unwrap(), 73.0);
}

#[test]
fn write_image_block_sizes_match_the_map() {
    let image = WriteImage::default();
    for (start, values) in image.blocks() {
        let expected = match start {
            32560 => 16,
            32592 => 32,
            32624 | 32656 | 32688 | 32720 => 16,
            other => panic!("unexpected block start {other}"),
        };
        assert_eq!(values.len(), expected, "block at {start}");
    }
}

#[test]
fn doubleword_decode_is_lsw_first() {
    assert_eq!(decode_u32(&[0x0002, 0x0001]).unwrap(), 0x0001_0002);
    assert_eq!(decode_f32(&[0x0000, 0x3F80]).unwrap(), 1.0);
}
