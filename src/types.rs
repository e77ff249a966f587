// src/types.rs
use std::path::PathBuf;
use serde::Serialize;
use crate::drivers::{Sample, SignalRecord, SpectrumResult};

// 调用方发给采样线程的命令
#[derive(Clone, Debug)]
pub enum SessionCommand {
    // 开始把新采样写入 CSV
    StartRecording(PathBuf),
    StopRecording,
}

// 后台线程发给调用方的消息
#[derive(Clone, Debug)]
pub enum SessionEvent {
    Log(String),
    Frame(LiveFrame),
    // 单次读取失败；下一次采样会重试
    Error(String),
    RecordingStatus(bool),
    Stopped { samples_read: u64 },
}

// 绘图线程产出的一帧
#[derive(Clone, Debug, Serialize)]
pub struct LiveFrame {
    pub record: SignalRecord,
    pub spectrum: Option<SpectrumResult>,
    pub latest: Option<Sample>,
}
