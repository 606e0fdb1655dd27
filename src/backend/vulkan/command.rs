//! Command buffer submission

use ash::vk;

use super::recorder::Recorder;
use super::{map_vk, VulkanBackend};
use crate::backend::traits::*;

impl VulkanBackend {
    pub(super) fn queue_submit(&mut self, info: &SubmitInfo) -> BackendResult<()> {
        let cmd = *self
            .res
            .command_buffers
            .lookup(info.command_buffer.0, "command buffer")?;
        let wait = match info.wait_semaphore {
            Some(s) => Some(*self.res.semaphores.lookup(s.0, "semaphore")?),
            None => None,
        };
        let signal = match info.signal_semaphore {
            Some(s) => Some(*self.res.semaphores.lookup(s.0, "semaphore")?),
            None => None,
        };
        let fence = match info.fence {
            Some(f) => *self.res.fences.lookup(f.0, "fence")?,
            None => vk::Fence::null(),
        };

        let waits: Vec<vk::SemaphoreSubmitInfo> = wait
            .into_iter()
            .map(|semaphore| {
                vk::SemaphoreSubmitInfo::default()
                    .semaphore(semaphore)
                    .stage_mask(vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT)
            })
            .collect();
        let signals: Vec<vk::SemaphoreSubmitInfo> = signal
            .into_iter()
            .map(|semaphore| {
                vk::SemaphoreSubmitInfo::default()
                    .semaphore(semaphore)
                    .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
            })
            .collect();
        let commands = [vk::CommandBufferSubmitInfo::default().command_buffer(cmd)];
        let submit = vk::SubmitInfo2::default()
            .wait_semaphore_infos(&waits)
            .command_buffer_infos(&commands)
            .signal_semaphore_infos(&signals);

        unsafe {
            self.ctx
                .device
                .queue_submit2(self.ctx.queue, &[submit], fence)
        }
        .map_err(map_vk(BackendError::CommandFailed))
    }

    /// One-shot command buffer, submitted and waited on with its own fence.
    pub(super) fn run_immediate(
        &mut self,
        record: &mut dyn FnMut(&mut dyn CommandRecorder),
    ) -> BackendResult<()> {
        let device = &self.ctx.device;
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let cmd = unsafe { device.allocate_command_buffers(&alloc_info) }
            .map_err(map_vk(BackendError::CommandFailed))?
            .into_iter()
            .next()
            .ok_or_else(|| BackendError::CommandFailed("no command buffer returned".into()))?;

        let result = (|| {
            let begin = vk::CommandBufferBeginInfo::default()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            unsafe { device.begin_command_buffer(cmd, &begin) }
                .map_err(map_vk(BackendError::CommandFailed))?;
            record(&mut Recorder::new(device, &self.res, cmd));
            unsafe { device.end_command_buffer(cmd) }
                .map_err(map_vk(BackendError::CommandFailed))?;

            let fence = unsafe { device.create_fence(&vk::FenceCreateInfo::default(), None) }
                .map_err(map_vk(BackendError::SyncFailed))?;
            let commands = [vk::CommandBufferSubmitInfo::default().command_buffer(cmd)];
            let submit = vk::SubmitInfo2::default().command_buffer_infos(&commands);
            let done = unsafe { device.queue_submit2(self.ctx.queue, &[submit], fence) }
                .map_err(map_vk(BackendError::CommandFailed))
                .and_then(|()| {
                    unsafe { device.wait_for_fences(&[fence], true, u64::MAX) }
                        .map_err(map_vk(BackendError::SyncFailed))
                });
            unsafe { device.destroy_fence(fence, None) };
            done
        })();

        unsafe { device.free_command_buffers(self.command_pool, &[cmd]) };
        result
    }
}
