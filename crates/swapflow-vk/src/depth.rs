// SPDX-License-Identifier: CEPL-1.0
use ash::vk;

use crate::device::FrameDevice;
use crate::error::{FrameError, FrameResult, VkResultExt};
use crate::surface::find_memory_type;

/// One depth image shared by every framebuffer of a chain generation.
#[derive(Clone, Copy, Debug)]
pub struct DepthAttachment {
    image: vk::Image,
    memory: vk::DeviceMemory,
    view: vk::ImageView,
    extent: vk::Extent2D,
    format: vk::Format,
}

fn has_stencil(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D24_UNORM_S8_UINT | vk::Format::D32_SFLOAT_S8_UINT | vk::Format::D16_UNORM_S8_UINT
    )
}

impl DepthAttachment {
    pub fn create<D: FrameDevice + ?Sized>(
        device: &D,
        extent: vk::Extent2D,
        format: vk::Format,
    ) -> FrameResult<Self> {
        let img_ci = vk::ImageCreateInfo {
            s_type: vk::StructureType::IMAGE_CREATE_INFO,
            image_type: vk::ImageType::TYPE_2D,
            format,
            extent: vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            },
            mip_levels: 1,
            array_layers: 1,
            samples: vk::SampleCountFlags::TYPE_1,
            tiling: vk::ImageTiling::OPTIMAL,
            usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            ..Default::default()
        };
        let image = device.create_image(&img_ci).or_fatal("create_image(depth)")?;

        let mem_req = device.image_memory_requirements(image);
        let Some(type_index) = find_memory_type(
            &device.memory_properties(),
            mem_req.memory_type_bits,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        ) else {
            device.destroy_image(image);
            return Err(FrameError::NoMemoryType {
                what: "depth image",
            });
        };

        let memory = match device.allocate_memory(mem_req.size, type_index) {
            Ok(m) => m,
            Err(e) => {
                device.destroy_image(image);
                return Err(FrameError::from_vk("allocate_memory(depth)", e));
            }
        };

        let mut aspect = vk::ImageAspectFlags::DEPTH;
        if has_stencil(format) {
            aspect |= vk::ImageAspectFlags::STENCIL;
        }
        let view = device
            .bind_image_memory(image, memory)
            .map_err(|e| ("bind_image_memory(depth)", e))
            .and_then(|()| {
                device
                    .create_image_view(image, format, aspect)
                    .map_err(|e| ("create_image_view(depth)", e))
            });
        let view = match view {
            Ok(v) => v,
            Err((what, e)) => {
                device.destroy_image(image);
                device.free_memory(memory);
                return Err(FrameError::from_vk(what, e));
            }
        };

        Ok(Self {
            image,
            memory,
            view,
            extent,
            format,
        })
    }

    pub fn destroy<D: FrameDevice + ?Sized>(self, device: &D) {
        device.destroy_image_view(self.view);
        device.destroy_image(self.image);
        device.free_memory(self.memory);
    }

    pub fn image(&self) -> vk::Image {
        self.image
    }

    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }
}
