// 该文件是 Xunjiu （寻救） 项目的一部分。
// src/task.rs - 帧处理任务
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::{
  sync::mpsc::{self, Receiver},
  thread,
  time::{Duration, Instant},
};

use tracing::{debug, info, warn};

use crate::{
  detector::{DetectError, VictimDetector},
  frame::Frame,
  model::{Model, ModelError},
  output::{Render, StatusLine},
};

const FORCE_EXIT_AFTER: Duration = Duration::from_secs(30);

/// 自开始以来的平均帧率
#[derive(Debug)]
pub struct FpsCounter {
  start: Instant,
  frames: u64,
}

impl Default for FpsCounter {
  fn default() -> Self {
    Self::new()
  }
}

impl FpsCounter {
  pub fn new() -> Self {
    Self {
      start: Instant::now(),
      frames: 0,
    }
  }

  pub fn tick(&mut self) -> f64 {
    self.frames += 1;
    fps(self.frames, self.start.elapsed())
  }
}

fn fps(frames: u64, elapsed: Duration) -> f64 {
  let secs = elapsed.as_secs_f64();
  if secs > 0.0 { frames as f64 / secs } else { 0.0 }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TaskSummary {
  pub frames: usize,
  pub skipped: usize,
  pub total_victims: usize,
}

pub trait Task<I, M, O>: Sized {
  type Error;
  fn run_task(
    self,
    input: I,
    detector: VictimDetector<M>,
    output: O,
  ) -> Result<TaskSummary, Self::Error>;
}

/// 只处理第一帧
pub struct OneShotTask;

impl<RE, I, M, O> Task<I, M, O> for OneShotTask
where
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = Frame>,
  M: Model,
  O: Render<Error = RE>,
{
  type Error = anyhow::Error;

  fn run_task(
    self,
    mut input: I,
    detector: VictimDetector<M>,
    output: O,
  ) -> Result<TaskSummary, Self::Error> {
    info!("开始任务...");
    let frame = input.next().ok_or_else(|| anyhow::anyhow!("没有输入帧"))?;
    let mut counter = FpsCounter::new();
    let now = Instant::now();
    let result = detector.process_frame(&frame)?;
    info!("推理完成，耗时: {:.2?}", now.elapsed());

    let status = StatusLine {
      fps: counter.tick(),
      victims: result.victim_count,
    };
    info!("{}", status);
    output.render_result(&frame, &result, &status)?;

    Ok(TaskSummary {
      frames: 1,
      skipped: 0,
      total_victims: result.victim_count,
    })
  }
}

/// 逐帧处理直到输入结束、达到帧数上限或收到中断
#[derive(Default, Debug)]
pub struct ContinuousTask {
  frame_number: Option<usize>,
  skip_failed_frames: bool,
  interrupt: Option<Receiver<()>>,
}

impl ContinuousTask {
  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number;
    self
  }

  /// 推理失败时跳过该帧而不是终止任务
  pub fn with_skip_failed_frames(mut self, skip: bool) -> Self {
    self.skip_failed_frames = skip;
    self
  }

  pub fn with_interrupt(mut self, interrupt: Receiver<()>) -> Self {
    self.interrupt = Some(interrupt);
    self
  }

  /// 安装 Ctrl-C 处理器，每帧结束时检查一次
  pub fn interrupt_on_ctrlc(self) -> Result<Self, ctrlc::Error> {
    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
      info!("收到中断信号，准备退出...");
      let _ = tx.send(());
      thread::spawn(|| {
        thread::sleep(FORCE_EXIT_AFTER);
        warn!("强制退出程序");
        std::process::exit(1);
      });
    })?;
    Ok(self.with_interrupt(rx))
  }

  fn interrupted(&self) -> bool {
    self
      .interrupt
      .as_ref()
      .is_some_and(|rx| rx.try_recv().is_ok())
  }
}

impl<RE, I, M, O> Task<I, M, O> for ContinuousTask
where
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = Frame>,
  M: Model,
  O: Render<Error = RE>,
{
  type Error = anyhow::Error;

  fn run_task(
    self,
    input: I,
    detector: VictimDetector<M>,
    output: O,
  ) -> Result<TaskSummary, Self::Error> {
    info!("开始任务...");
    let mut summary = TaskSummary::default();
    let mut counter = FpsCounter::new();

    for (index, frame) in input.enumerate() {
      if self.frame_number.is_some_and(|n| index >= n) {
        info!("达到指定帧数 {}, 退出任务循环", index);
        break;
      }

      debug!("处理第 {} 帧图像", index + 1);
      let now = Instant::now();
      let result = match detector.process_frame(&frame) {
        Ok(result) => Some(result),
        Err(DetectError::Model(ModelError::InferenceError(e))) if self.skip_failed_frames => {
          warn!("第 {} 帧推理失败，跳过: {}", index + 1, e);
          summary.skipped += 1;
          counter.tick();
          None
        }
        Err(e) => return Err(e.into()),
      };

      if let Some(result) = result {
        let elapsed = now.elapsed();
        let status = StatusLine {
          fps: counter.tick(),
          victims: result.victim_count,
        };
        output.render_result(&frame, &result, &status)?;
        info!("{} （推理耗时: {:.2?}）", status, elapsed);

        summary.frames += 1;
        summary.total_victims += result.victim_count;
      }

      if self.interrupted() {
        warn!("中断信号接收，退出任务循环");
        break;
      }
    }

    info!("任务完成，退出");
    Ok(summary)
  }
}

#[cfg(test)]
mod tests {
  use std::cell::{Cell, RefCell};
  use std::convert::Infallible;

  use super::*;
  use crate::{
    detector::{DetectorConfig, FrameResult},
    labels::ClassLabels,
    model::{InputSpec, InputTensor, RawOutput},
  };

  /// 按调用次数依次返回：第 n 次输出 n 个互不重叠的 victim
  struct CountingModel {
    calls: Cell<usize>,
    fail_on: Option<usize>,
  }

  impl Model for CountingModel {
    fn input_spec(&self) -> InputSpec {
      InputSpec {
        width: 8,
        height: 8,
        ..InputSpec::default()
      }
    }

    fn infer(&self, _input: &InputTensor) -> Result<Vec<RawOutput>, ModelError> {
      let n = self.calls.get() + 1;
      self.calls.set(n);
      if self.fail_on == Some(n) {
        return Err(ModelError::InferenceError("shape".into()));
      }
      let rows: Vec<Vec<f32>> = (0..n)
        .map(|i| vec![0.05 + 0.1 * i as f32, 0.5, 0.05, 0.05, 1.0, 0.9, 0.0])
        .collect();
      Ok(vec![RawOutput::from_rows(&rows)?])
    }
  }

  #[derive(Default)]
  struct Recorder {
    statuses: RefCell<Vec<StatusLine>>,
  }

  impl Render for &Recorder {
    type Error = Infallible;

    fn render_result(
      &self,
      _frame: &Frame,
      result: &FrameResult,
      status: &StatusLine,
    ) -> Result<(), Self::Error> {
      assert_eq!(result.victim_count, status.victims);
      self.statuses.borrow_mut().push(*status);
      Ok(())
    }
  }

  fn detector(fail_on: Option<usize>) -> VictimDetector<CountingModel> {
    VictimDetector::new(
      CountingModel {
        calls: Cell::new(0),
        fail_on,
      },
      ["person", "bicycle"].into_iter().collect::<ClassLabels>(),
      DetectorConfig::default(),
    )
  }

  fn frames(n: usize) -> impl Iterator<Item = Frame> {
    (0..n).map(|_| Frame::from(image::RgbImage::new(100, 100)))
  }

  #[test]
  fn fps_is_zero_without_elapsed_time() {
    assert_eq!(fps(3, Duration::ZERO), 0.0);
    assert_eq!(fps(10, Duration::from_secs(2)), 5.0);
  }

  #[test]
  fn victim_count_follows_each_frame() {
    let recorder = Recorder::default();
    let summary = ContinuousTask::default()
      .run_task(frames(4), detector(None), &recorder)
      .unwrap();

    let victims: Vec<usize> = recorder.statuses.borrow().iter().map(|s| s.victims).collect();
    assert_eq!(victims, vec![1, 2, 3, 4]);
    assert_eq!(summary.frames, 4);
    assert_eq!(summary.total_victims, 10);
  }

  #[test]
  fn frame_limit_stops_the_loop() {
    let recorder = Recorder::default();
    let summary = ContinuousTask::default()
      .with_frame_number(Some(2))
      .run_task(frames(10), detector(None), &recorder)
      .unwrap();
    assert_eq!(summary.frames, 2);
  }

  #[test]
  fn inference_error_aborts_by_default() {
    let recorder = Recorder::default();
    let err = ContinuousTask::default()
      .run_task(frames(4), detector(Some(2)), &recorder)
      .unwrap_err();
    assert!(err.downcast_ref::<DetectError>().is_some());
    assert_eq!(recorder.statuses.borrow().len(), 1);
  }

  #[test]
  fn inference_error_can_be_skipped() {
    let recorder = Recorder::default();
    let summary = ContinuousTask::default()
      .with_skip_failed_frames(true)
      .run_task(frames(3), detector(Some(2)), &recorder)
      .unwrap();
    assert_eq!(summary.frames, 2);
    assert_eq!(summary.skipped, 1);
    let victims: Vec<usize> = recorder.statuses.borrow().iter().map(|s| s.victims).collect();
    assert_eq!(victims, vec![1, 3]);
  }

  #[test]
  fn interrupt_is_checked_at_frame_boundary() {
    let (tx, rx) = mpsc::channel();
    tx.send(()).unwrap();
    let recorder = Recorder::default();
    let summary = ContinuousTask::default()
      .with_interrupt(rx)
      .run_task(frames(5), detector(None), &recorder)
      .unwrap();
    assert_eq!(summary.frames, 1);
  }

  #[test]
  fn interrupt_is_checked_after_skipped_frame() {
    let (tx, rx) = mpsc::channel();
    tx.send(()).unwrap();
    let recorder = Recorder::default();
    let summary = ContinuousTask::default()
      .with_skip_failed_frames(true)
      .with_interrupt(rx)
      .run_task(frames(5), detector(Some(1)), &recorder)
      .unwrap();
    assert_eq!(summary.frames, 0);
    assert_eq!(summary.skipped, 1);
    assert!(recorder.statuses.borrow().is_empty());
  }

  #[test]
  fn one_shot_uses_first_frame_only() {
    let recorder = Recorder::default();
    let summary = OneShotTask
      .run_task(frames(3), detector(None), &recorder)
      .unwrap();
    assert_eq!(summary.frames, 1);
    assert_eq!(summary.total_victims, 1);
    assert!(OneShotTask.run_task(frames(0), detector(None), &recorder).is_err());
  }
}
