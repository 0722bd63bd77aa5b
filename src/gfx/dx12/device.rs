//! DirectX 12 设备
//!
//! 一个直接队列、一个命令分配器和一个命令列表。`execute` 在每次提交前重置分配器：
//! 渲染器在提交后总是等待 fence，分配器不会在 GPU 使用中被重置。
//!
//! 原生对象按引擎分配的 id 保存在表中；屏障与拷贝位置借用 COM 指针而不增加引用计数。

use std::collections::HashMap;
use std::ffi::{c_void, CString};
use std::ptr::NonNull;

use raw_window_handle::{HasWindowHandle, RawWindowHandle};
use tracing::{debug, info, warn};
use windows::core::{Interface, HSTRING, PCSTR};
use windows::Win32::Foundation::{CloseHandle, HANDLE, HWND, RECT};
use windows::Win32::Graphics::Direct3D::Fxc::{D3DCompile, D3DCOMPILE_DEBUG, D3DCOMPILE_SKIP_OPTIMIZATION};
use windows::Win32::Graphics::Direct3D::*;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;
use windows::Win32::Graphics::Dxgi::*;
use windows::Win32::System::Threading::{CreateEventA, WaitForSingleObject, INFINITE};
use winit::window::Window;

use super::convert;
use crate::core::error::{EngineError, GraphicsError, Result};
use crate::gfx::device::*;
use crate::renderer::command::{Command, SubresourceFootprint};
use crate::renderer::pipeline::PipelineStateDesc;
use crate::renderer::root_signature::{RootParameter, RootSignatureDesc};

fn graphics(kind: fn(String) -> GraphicsError, what: &'static str) -> impl Fn(windows::core::Error) -> EngineError {
    move |e| kind(format!("{}: {}", what, e)).into()
}

fn unknown_resource(id: ResourceId) -> EngineError {
    GraphicsError::CommandExecution(format!("Unknown resource {:?}", id)).into()
}

/// 借用 COM 指针，不增加引用计数
///
/// # Safety
///
/// 返回值不能比 `object` 活得更久，也不能被 drop。
unsafe fn borrow_com<T: Interface, U>(object: &T) -> U {
    std::mem::transmute_copy(object)
}

unsafe fn blob_bytes(blob: &ID3DBlob) -> &[u8] {
    std::slice::from_raw_parts(blob.GetBufferPointer() as *const u8, blob.GetBufferSize())
}

unsafe fn blob_message(blob: Option<ID3DBlob>) -> String {
    blob.map(|b| String::from_utf8_lossy(blob_bytes(&b)).trim_end_matches('\0').to_string())
        .unwrap_or_default()
}

struct NativeEntry {
    resource: ID3D12Resource,
    size: u64,
    mapped: Option<MappedRegion>,
    liveness: MappingLiveness,
}

impl Drop for NativeEntry {
    fn drop(&mut self) {
        // 资源引用归还前使已分发的映射失效
        self.liveness.revoke();
    }
}

/// DirectX 12 渲染设备
pub struct Dx12Device {
    factory: IDXGIFactory4,
    device: ID3D12Device,
    queue: ID3D12CommandQueue,
    allocator: ID3D12CommandAllocator,
    list: ID3D12GraphicsCommandList,
    fence: ID3D12Fence,
    fence_event: HANDLE,
    hwnd: HWND,
    swap_chain: Option<IDXGISwapChain3>,
    swap_chain_desc: Option<SwapChainDesc>,
    back_buffers: Vec<ResourceId>,
    resources: HashMap<ResourceId, NativeEntry>,
    heaps: HashMap<NativeHeapId, ID3D12DescriptorHeap>,
    root_signatures: Vec<ID3D12RootSignature>,
    pipeline_states: Vec<ID3D12PipelineState>,
    next_id: u64,
}

impl Dx12Device {
    /// 在窗口上创建设备、直接队列、命令列表与 fence
    ///
    /// 交换链由渲染器稍后通过 `create_swap_chain` 创建。
    pub fn new(window: &Window, debug_layer: bool) -> Result<Self> {
        let handle = window
            .window_handle()
            .map_err(|e| GraphicsError::DeviceCreation(format!("Failed to get window handle: {}", e)))?;
        let hwnd = match handle.as_raw() {
            RawWindowHandle::Win32(win32) => HWND(win32.hwnd.get() as *mut c_void),
            _ => return Err(GraphicsError::DeviceCreation("Expected a Win32 window handle".to_string()).into()),
        };

        unsafe {
            if debug_layer {
                let mut debug: Option<ID3D12Debug> = None;
                match D3D12GetDebugInterface(&mut debug) {
                    Ok(()) => {
                        if let Some(debug) = debug {
                            debug.EnableDebugLayer();
                            debug!("DX12 debug layer enabled");
                        }
                    }
                    Err(e) => warn!("Failed to enable DX12 debug layer: {}", e),
                }
            }

            let flags = if debug_layer {
                DXGI_CREATE_FACTORY_DEBUG
            } else {
                DXGI_CREATE_FACTORY_FLAGS(0)
            };
            let factory: IDXGIFactory4 = CreateDXGIFactory2(flags)
                .map_err(graphics(GraphicsError::DeviceCreation, "Failed to create DXGI factory"))?;

            let mut device: Option<ID3D12Device> = None;
            D3D12CreateDevice(None, D3D_FEATURE_LEVEL_11_0, &mut device)
                .map_err(graphics(GraphicsError::DeviceCreation, "Failed to create D3D12 device"))?;
            let device = device.ok_or_else(|| GraphicsError::DeviceCreation("D3D12CreateDevice returned no device".to_string()))?;

            let queue: ID3D12CommandQueue = device
                .CreateCommandQueue(&D3D12_COMMAND_QUEUE_DESC {
                    Type: D3D12_COMMAND_LIST_TYPE_DIRECT,
                    Flags: D3D12_COMMAND_QUEUE_FLAG_NONE,
                    ..Default::default()
                })
                .map_err(graphics(GraphicsError::DeviceCreation, "Failed to create command queue"))?;

            let allocator: ID3D12CommandAllocator = device
                .CreateCommandAllocator(D3D12_COMMAND_LIST_TYPE_DIRECT)
                .map_err(graphics(GraphicsError::DeviceCreation, "Failed to create command allocator"))?;
            let list: ID3D12GraphicsCommandList = device
                .CreateCommandList(0, D3D12_COMMAND_LIST_TYPE_DIRECT, &allocator, None)
                .map_err(graphics(GraphicsError::DeviceCreation, "Failed to create command list"))?;
            // 新建的列表处于记录状态
            list.Close()
                .map_err(graphics(GraphicsError::DeviceCreation, "Failed to close initial command list"))?;

            let fence: ID3D12Fence = device
                .CreateFence(0, D3D12_FENCE_FLAG_NONE)
                .map_err(graphics(GraphicsError::DeviceCreation, "Failed to create fence"))?;
            let fence_event = CreateEventA(None, false, false, None)
                .map_err(graphics(GraphicsError::DeviceCreation, "Failed to create fence event"))?;

            info!(debug_layer, "DX12 device created");

            Ok(Self {
                factory,
                device,
                queue,
                allocator,
                list,
                fence,
                fence_event,
                hwnd,
                swap_chain: None,
                swap_chain_desc: None,
                back_buffers: Vec::new(),
                resources: HashMap::new(),
                heaps: HashMap::new(),
                root_signatures: Vec::new(),
                pipeline_states: Vec::new(),
                next_id: 1,
            })
        }
    }

    fn next_resource_id(&mut self) -> ResourceId {
        let id = ResourceId(self.next_id);
        self.next_id += 1;
        id
    }

    fn insert(&mut self, name: &str, resource: ID3D12Resource, size: u64) -> ResourceId {
        unsafe {
            // 名称只用于调试工具
            let _ = resource.SetName(&HSTRING::from(name));
        }
        let id = self.next_resource_id();
        self.resources.insert(
            id,
            NativeEntry {
                resource,
                size,
                mapped: None,
                liveness: MappingLiveness::new(),
            },
        );
        id
    }

    fn native(&self, id: ResourceId) -> Result<&ID3D12Resource> {
        self.resources
            .get(&id)
            .map(|entry| &entry.resource)
            .ok_or_else(|| unknown_resource(id))
    }

    fn heap(&self, id: NativeHeapId) -> Result<&ID3D12DescriptorHeap> {
        self.heaps
            .get(&id)
            .ok_or_else(|| GraphicsError::CommandExecution(format!("Unknown descriptor heap {:?}", id)).into())
    }

    fn root_signature(&self, id: RootSignatureId) -> Result<&ID3D12RootSignature> {
        self.root_signatures
            .get(id.0 as usize)
            .ok_or_else(|| GraphicsError::CommandExecution(format!("Unknown root signature {:?}", id)).into())
    }

    fn pipeline_state(&self, id: PipelineStateId) -> Result<&ID3D12PipelineState> {
        self.pipeline_states
            .get(id.0 as usize)
            .ok_or_else(|| GraphicsError::CommandExecution(format!("Unknown pipeline state {:?}", id)).into())
    }

    fn swap_chain(&self) -> Result<&IDXGISwapChain3> {
        self.swap_chain
            .as_ref()
            .ok_or_else(|| GraphicsError::SwapchainError("Swap chain has not been created".to_string()).into())
    }

    fn wrap_back_buffers(&mut self, count: u32, width: u32, height: u32) -> Result<Vec<NativeResource>> {
        let swap_chain = self.swap_chain()?.clone();
        let size = width as u64 * height as u64 * 4;
        let mut natives = Vec::with_capacity(count as usize);
        self.back_buffers.clear();

        for i in 0..count {
            let buffer: ID3D12Resource = unsafe { swap_chain.GetBuffer(i) }
                .map_err(graphics(GraphicsError::SwapchainError, "Failed to get swap chain buffer"))?;
            let id = self.insert(&format!("BackBuffer{}", i), buffer, size);
            self.back_buffers.push(id);
            natives.push(NativeResource { id, gpu_address: 0 });
        }
        Ok(natives)
    }

    fn record(&self, command: &Command) -> Result<()> {
        let list = &self.list;
        unsafe {
            match command {
                Command::ResourceBarrier(transition) => {
                    let resource = self.native(transition.resource)?;
                    let barrier = D3D12_RESOURCE_BARRIER {
                        Type: D3D12_RESOURCE_BARRIER_TYPE_TRANSITION,
                        Flags: D3D12_RESOURCE_BARRIER_FLAG_NONE,
                        Anonymous: D3D12_RESOURCE_BARRIER_0 {
                            Transition: std::mem::ManuallyDrop::new(D3D12_RESOURCE_TRANSITION_BARRIER {
                                pResource: borrow_com(resource),
                                Subresource: D3D12_RESOURCE_BARRIER_ALL_SUBRESOURCES,
                                StateBefore: convert::resource_state(transition.before),
                                StateAfter: convert::resource_state(transition.after),
                            }),
                        },
                    };
                    list.ResourceBarrier(&[barrier]);
                }
                Command::SetViewport(viewport) => {
                    list.RSSetViewports(&[D3D12_VIEWPORT {
                        TopLeftX: viewport.top_left_x,
                        TopLeftY: viewport.top_left_y,
                        Width: viewport.width,
                        Height: viewport.height,
                        // D3D12 的深度范围是 [0, 1]
                        MinDepth: viewport.min_depth.max(0.0),
                        MaxDepth: viewport.max_depth.min(1.0),
                    }]);
                }
                Command::SetScissorRect(rect) => {
                    list.RSSetScissorRects(&[RECT {
                        left: rect.left,
                        top: rect.top,
                        right: rect.right,
                        bottom: rect.bottom,
                    }]);
                }
                Command::SetRenderTargets { rtv, dsv } => {
                    let rtv = D3D12_CPU_DESCRIPTOR_HANDLE { ptr: rtv.0 };
                    let dsv = dsv.map(|d| D3D12_CPU_DESCRIPTOR_HANDLE { ptr: d.0 });
                    list.OMSetRenderTargets(1, Some(&rtv), false, dsv.as_ref().map(|d| d as *const _));
                }
                Command::ClearRenderTargetView { rtv, color } => {
                    list.ClearRenderTargetView(D3D12_CPU_DESCRIPTOR_HANDLE { ptr: rtv.0 }, color, None);
                }
                Command::ClearDepthStencilView { dsv, depth, stencil } => {
                    list.ClearDepthStencilView(
                        D3D12_CPU_DESCRIPTOR_HANDLE { ptr: dsv.0 },
                        D3D12_CLEAR_FLAG_DEPTH | D3D12_CLEAR_FLAG_STENCIL,
                        *depth,
                        *stencil,
                        None,
                    );
                }
                Command::SetPrimitiveTopology(topology) => {
                    list.IASetPrimitiveTopology(convert::topology(*topology));
                }
                Command::SetDescriptorHeaps(heap) => {
                    list.SetDescriptorHeaps(&[Some(self.heap(*heap)?.clone())]);
                }
                Command::SetGraphicsRootSignature(id) => {
                    list.SetGraphicsRootSignature(self.root_signature(*id)?);
                }
                Command::SetGraphicsRootConstantBufferView { root_index, address } => {
                    list.SetGraphicsRootConstantBufferView(*root_index, *address);
                }
                Command::SetGraphicsRootDescriptorTable { root_index, base } => {
                    list.SetGraphicsRootDescriptorTable(*root_index, D3D12_GPU_DESCRIPTOR_HANDLE { ptr: base.0 });
                }
                Command::SetPipelineState(id) => {
                    list.SetPipelineState(self.pipeline_state(*id)?);
                }
                Command::SetVertexBuffers { start_slot, views } => {
                    let views: Vec<D3D12_VERTEX_BUFFER_VIEW> = views
                        .iter()
                        .map(|v| D3D12_VERTEX_BUFFER_VIEW {
                            BufferLocation: v.address,
                            SizeInBytes: v.size,
                            StrideInBytes: v.stride,
                        })
                        .collect();
                    list.IASetVertexBuffers(*start_slot, Some(&views));
                }
                Command::SetIndexBuffer(view) => {
                    list.IASetIndexBuffer(Some(&D3D12_INDEX_BUFFER_VIEW {
                        BufferLocation: view.address,
                        SizeInBytes: view.size,
                        Format: convert::format(view.format),
                    }));
                }
                Command::DrawIndexedInstanced {
                    index_count,
                    instance_count,
                    start_index,
                    base_vertex,
                    start_instance,
                } => {
                    list.DrawIndexedInstanced(*index_count, *instance_count, *start_index, *base_vertex, *start_instance);
                }
                Command::CopyBufferRegion {
                    dst,
                    dst_offset,
                    src,
                    src_offset,
                    size,
                } => {
                    list.CopyBufferRegion(self.native(*dst)?, *dst_offset, self.native(*src)?, *src_offset, *size);
                }
                Command::CopyTextureRegion {
                    dst,
                    subresource,
                    src,
                    footprint,
                } => {
                    let dst = D3D12_TEXTURE_COPY_LOCATION {
                        pResource: borrow_com(self.native(*dst)?),
                        Type: D3D12_TEXTURE_COPY_TYPE_SUBRESOURCE_INDEX,
                        Anonymous: D3D12_TEXTURE_COPY_LOCATION_0 {
                            SubresourceIndex: *subresource,
                        },
                    };
                    let src = D3D12_TEXTURE_COPY_LOCATION {
                        pResource: borrow_com(self.native(*src)?),
                        Type: D3D12_TEXTURE_COPY_TYPE_PLACED_FOOTPRINT,
                        Anonymous: D3D12_TEXTURE_COPY_LOCATION_0 {
                            PlacedFootprint: placed_footprint(footprint),
                        },
                    };
                    list.CopyTextureRegion(&dst, 0, 0, 0, &src, None);
                }
            }
        }
        Ok(())
    }
}

fn placed_footprint(footprint: &SubresourceFootprint) -> D3D12_PLACED_SUBRESOURCE_FOOTPRINT {
    D3D12_PLACED_SUBRESOURCE_FOOTPRINT {
        Offset: footprint.offset,
        Footprint: D3D12_SUBRESOURCE_FOOTPRINT {
            Format: convert::format(footprint.format),
            Width: footprint.width,
            Height: footprint.height,
            Depth: 1,
            RowPitch: footprint.row_pitch,
        },
    }
}

impl RenderDevice for Dx12Device {
    fn name(&self) -> &str {
        "DirectX 12"
    }

    fn create_descriptor_heap(
        &mut self,
        kind: DescriptorHeapKind,
        capacity: u32,
        shader_visible: bool,
    ) -> Result<DescriptorHeapInfo> {
        let heap_type = convert::descriptor_heap_type(kind);
        unsafe {
            let heap: ID3D12DescriptorHeap = self
                .device
                .CreateDescriptorHeap(&D3D12_DESCRIPTOR_HEAP_DESC {
                    Type: heap_type,
                    NumDescriptors: capacity,
                    Flags: if shader_visible {
                        D3D12_DESCRIPTOR_HEAP_FLAG_SHADER_VISIBLE
                    } else {
                        D3D12_DESCRIPTOR_HEAP_FLAG_NONE
                    },
                    NodeMask: 0,
                })
                .map_err(graphics(GraphicsError::ResourceCreationFailure, "Failed to create descriptor heap"))?;

            let info = DescriptorHeapInfo {
                native: NativeHeapId(self.heaps.len() as u64),
                cpu_base: heap.GetCPUDescriptorHandleForHeapStart().ptr,
                gpu_base: shader_visible.then(|| heap.GetGPUDescriptorHandleForHeapStart().ptr),
                increment: self.device.GetDescriptorHandleIncrementSize(heap_type),
            };
            self.heaps.insert(info.native, heap);
            Ok(info)
        }
    }

    fn create_buffer(&mut self, desc: &BufferDesc) -> Result<NativeResource> {
        let heap_props = D3D12_HEAP_PROPERTIES {
            Type: convert::heap_type(desc.heap),
            ..Default::default()
        };
        let resource_desc = D3D12_RESOURCE_DESC {
            Dimension: D3D12_RESOURCE_DIMENSION_BUFFER,
            Width: desc.size,
            Height: 1,
            DepthOrArraySize: 1,
            MipLevels: 1,
            SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
            Layout: D3D12_TEXTURE_LAYOUT_ROW_MAJOR,
            ..Default::default()
        };

        let resource = unsafe {
            let mut resource: Option<ID3D12Resource> = None;
            self.device
                .CreateCommittedResource(
                    &heap_props,
                    D3D12_HEAP_FLAG_NONE,
                    &resource_desc,
                    convert::resource_state(desc.initial_state),
                    None,
                    &mut resource,
                )
                .map_err(graphics(GraphicsError::ResourceCreationFailure, "Failed to create buffer"))?;
            resource.ok_or_else(|| GraphicsError::ResourceCreationFailure(format!("Buffer '{}' was not created", desc.name)))?
        };

        let gpu_address = unsafe { resource.GetGPUVirtualAddress() };
        let id = self.insert(&desc.name, resource, desc.size);
        Ok(NativeResource { id, gpu_address })
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> Result<NativeResource> {
        let heap_props = D3D12_HEAP_PROPERTIES {
            Type: D3D12_HEAP_TYPE_DEFAULT,
            ..Default::default()
        };
        let flags = match desc.usage {
            TextureUsage::ShaderResource => D3D12_RESOURCE_FLAG_NONE,
            TextureUsage::RenderTarget => D3D12_RESOURCE_FLAG_ALLOW_RENDER_TARGET,
            TextureUsage::DepthStencil => D3D12_RESOURCE_FLAG_ALLOW_DEPTH_STENCIL,
        };
        let resource_desc = D3D12_RESOURCE_DESC {
            Dimension: D3D12_RESOURCE_DIMENSION_TEXTURE2D,
            Width: desc.width as u64,
            Height: desc.height,
            DepthOrArraySize: desc.array_size as u16,
            MipLevels: desc.mip_levels as u16,
            Format: convert::format(desc.format),
            SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
            Layout: D3D12_TEXTURE_LAYOUT_UNKNOWN,
            Flags: flags,
            ..Default::default()
        };
        let clear_value = (desc.usage == TextureUsage::DepthStencil).then(|| D3D12_CLEAR_VALUE {
            Format: DXGI_FORMAT_D24_UNORM_S8_UINT,
            Anonymous: D3D12_CLEAR_VALUE_0 {
                DepthStencil: D3D12_DEPTH_STENCIL_VALUE { Depth: 1.0, Stencil: 0 },
            },
        });

        let resource = unsafe {
            let mut resource: Option<ID3D12Resource> = None;
            self.device
                .CreateCommittedResource(
                    &heap_props,
                    D3D12_HEAP_FLAG_NONE,
                    &resource_desc,
                    convert::resource_state(desc.initial_state),
                    clear_value.as_ref().map(|c| c as *const _),
                    &mut resource,
                )
                .map_err(graphics(GraphicsError::ResourceCreationFailure, "Failed to create texture"))?;
            resource.ok_or_else(|| GraphicsError::ResourceCreationFailure(format!("Texture '{}' was not created", desc.name)))?
        };

        let size = desc.width as u64 * desc.height as u64 * desc.format.bytes_per_pixel() as u64 * desc.array_size as u64;
        let id = self.insert(&desc.name, resource, size);
        Ok(NativeResource { id, gpu_address: 0 })
    }

    fn map(&mut self, resource: ResourceId) -> Result<MappedRegion> {
        let entry = self.resources.get_mut(&resource).ok_or_else(|| unknown_resource(resource))?;
        if let Some(mapped) = &entry.mapped {
            return Ok(mapped.clone());
        }

        let mut data: *mut c_void = std::ptr::null_mut();
        unsafe {
            // CPU 不读取
            entry
                .resource
                .Map(0, Some(&D3D12_RANGE { Begin: 0, End: 0 }), Some(&mut data))
                .map_err(graphics(GraphicsError::ResourceCreationFailure, "Failed to map resource"))?;
        }
        let ptr = NonNull::new(data as *mut u8)
            .ok_or_else(|| GraphicsError::ResourceCreationFailure("Map returned a null pointer".to_string()))?;
        // SAFETY: 映射在资源存在期间有效，NativeEntry 被丢弃时先 revoke
        let mapped = unsafe { MappedRegion::new(ptr, entry.size as usize, entry.liveness.clone()) };
        entry.mapped = Some(mapped.clone());
        Ok(mapped)
    }

    fn create_render_target_view(&mut self, resource: ResourceId, dest: CpuDescriptor) -> Result<()> {
        let resource = self.native(resource)?;
        unsafe {
            self.device
                .CreateRenderTargetView(resource, None, D3D12_CPU_DESCRIPTOR_HANDLE { ptr: dest.0 });
        }
        Ok(())
    }

    fn create_depth_stencil_view(
        &mut self,
        resource: ResourceId,
        format: Format,
        array_slice: Option<u32>,
        dest: CpuDescriptor,
    ) -> Result<()> {
        let resource = self.native(resource)?;
        let desc = match array_slice {
            Some(slice) => D3D12_DEPTH_STENCIL_VIEW_DESC {
                Format: convert::format(format),
                ViewDimension: D3D12_DSV_DIMENSION_TEXTURE2DARRAY,
                Flags: D3D12_DSV_FLAG_NONE,
                Anonymous: D3D12_DEPTH_STENCIL_VIEW_DESC_0 {
                    Texture2DArray: D3D12_TEX2D_ARRAY_DSV {
                        MipSlice: 0,
                        FirstArraySlice: slice,
                        ArraySize: 1,
                    },
                },
            },
            None => D3D12_DEPTH_STENCIL_VIEW_DESC {
                Format: convert::format(format),
                ViewDimension: D3D12_DSV_DIMENSION_TEXTURE2D,
                Flags: D3D12_DSV_FLAG_NONE,
                Anonymous: D3D12_DEPTH_STENCIL_VIEW_DESC_0 {
                    Texture2D: D3D12_TEX2D_DSV { MipSlice: 0 },
                },
            },
        };
        unsafe {
            self.device
                .CreateDepthStencilView(resource, Some(&desc), D3D12_CPU_DESCRIPTOR_HANDLE { ptr: dest.0 });
        }
        Ok(())
    }

    fn create_shader_resource_view(&mut self, resource: ResourceId, desc: &SrvDesc, dest: CpuDescriptor) -> Result<()> {
        let resource = self.native(resource)?;
        let view = match desc.dimension {
            SrvDimension::Texture2D => D3D12_SHADER_RESOURCE_VIEW_DESC {
                Format: convert::format(desc.format),
                ViewDimension: D3D12_SRV_DIMENSION_TEXTURE2D,
                Shader4ComponentMapping: D3D12_DEFAULT_SHADER_4_COMPONENT_MAPPING,
                Anonymous: D3D12_SHADER_RESOURCE_VIEW_DESC_0 {
                    Texture2D: D3D12_TEX2D_SRV {
                        MostDetailedMip: 0,
                        MipLevels: desc.mip_levels,
                        PlaneSlice: 0,
                        ResourceMinLODClamp: 0.0,
                    },
                },
            },
            SrvDimension::TextureCube => D3D12_SHADER_RESOURCE_VIEW_DESC {
                Format: convert::format(desc.format),
                ViewDimension: D3D12_SRV_DIMENSION_TEXTURECUBE,
                Shader4ComponentMapping: D3D12_DEFAULT_SHADER_4_COMPONENT_MAPPING,
                Anonymous: D3D12_SHADER_RESOURCE_VIEW_DESC_0 {
                    TextureCube: D3D12_TEXCUBE_SRV {
                        MostDetailedMip: 0,
                        MipLevels: desc.mip_levels,
                        ResourceMinLODClamp: 0.0,
                    },
                },
            },
        };
        unsafe {
            self.device
                .CreateShaderResourceView(resource, Some(&view), D3D12_CPU_DESCRIPTOR_HANDLE { ptr: dest.0 });
        }
        Ok(())
    }

    fn create_root_signature(&mut self, desc: &RootSignatureDesc) -> Result<RootSignatureId> {
        // 参数引用这些区间，必须在序列化结束前保持存活
        let ranges: Vec<Vec<D3D12_DESCRIPTOR_RANGE>> = desc
            .parameters
            .iter()
            .map(|parameter| match parameter {
                RootParameter::DescriptorTable { ranges, .. } => ranges
                    .iter()
                    .map(|range| D3D12_DESCRIPTOR_RANGE {
                        RangeType: convert::range_type(range.range_type),
                        NumDescriptors: range.count,
                        BaseShaderRegister: range.base_register,
                        RegisterSpace: range.space,
                        OffsetInDescriptorsFromTableStart: D3D12_DESCRIPTOR_RANGE_OFFSET_APPEND,
                    })
                    .collect(),
                _ => Vec::new(),
            })
            .collect();

        let parameters: Vec<D3D12_ROOT_PARAMETER> = desc
            .parameters
            .iter()
            .zip(&ranges)
            .map(|(parameter, ranges)| match parameter {
                RootParameter::Cbv {
                    register,
                    space,
                    visibility,
                } => D3D12_ROOT_PARAMETER {
                    ParameterType: D3D12_ROOT_PARAMETER_TYPE_CBV,
                    Anonymous: D3D12_ROOT_PARAMETER_0 {
                        Descriptor: D3D12_ROOT_DESCRIPTOR {
                            ShaderRegister: *register,
                            RegisterSpace: *space,
                        },
                    },
                    ShaderVisibility: convert::shader_visibility(*visibility),
                },
                RootParameter::DescriptorTable { visibility, .. } => D3D12_ROOT_PARAMETER {
                    ParameterType: D3D12_ROOT_PARAMETER_TYPE_DESCRIPTOR_TABLE,
                    Anonymous: D3D12_ROOT_PARAMETER_0 {
                        DescriptorTable: D3D12_ROOT_DESCRIPTOR_TABLE {
                            NumDescriptorRanges: ranges.len() as u32,
                            pDescriptorRanges: ranges.as_ptr(),
                        },
                    },
                    ShaderVisibility: convert::shader_visibility(*visibility),
                },
                RootParameter::Constants {
                    register,
                    space,
                    count,
                    visibility,
                } => D3D12_ROOT_PARAMETER {
                    ParameterType: D3D12_ROOT_PARAMETER_TYPE_32BIT_CONSTANTS,
                    Anonymous: D3D12_ROOT_PARAMETER_0 {
                        Constants: D3D12_ROOT_CONSTANTS {
                            ShaderRegister: *register,
                            RegisterSpace: *space,
                            Num32BitValues: *count,
                        },
                    },
                    ShaderVisibility: convert::shader_visibility(*visibility),
                },
            })
            .collect();

        let samplers: Vec<D3D12_STATIC_SAMPLER_DESC> = desc
            .static_samplers
            .iter()
            .map(|sampler| D3D12_STATIC_SAMPLER_DESC {
                Filter: convert::filter(sampler.filter),
                AddressU: convert::address_mode(sampler.address_u),
                AddressV: convert::address_mode(sampler.address_v),
                AddressW: convert::address_mode(sampler.address_w),
                MipLODBias: 0.0,
                MaxAnisotropy: sampler.max_anisotropy,
                ComparisonFunc: D3D12_COMPARISON_FUNC_NEVER,
                BorderColor: D3D12_STATIC_BORDER_COLOR_TRANSPARENT_BLACK,
                MinLOD: 0.0,
                MaxLOD: D3D12_FLOAT32_MAX,
                ShaderRegister: sampler.register,
                RegisterSpace: 0,
                ShaderVisibility: convert::shader_visibility(sampler.visibility),
            })
            .collect();

        let root_desc = D3D12_ROOT_SIGNATURE_DESC {
            NumParameters: parameters.len() as u32,
            pParameters: parameters.as_ptr(),
            NumStaticSamplers: samplers.len() as u32,
            pStaticSamplers: samplers.as_ptr(),
            Flags: D3D12_ROOT_SIGNATURE_FLAGS(desc.flags.bits() as i32),
        };

        unsafe {
            let mut signature: Option<ID3DBlob> = None;
            let mut error: Option<ID3DBlob> = None;
            if let Err(e) = D3D12SerializeRootSignature(&root_desc, D3D_ROOT_SIGNATURE_VERSION_1, &mut signature, Some(&mut error)) {
                return Err(GraphicsError::ResourceCreationFailure(format!(
                    "Failed to serialize root signature: {} {}",
                    e,
                    blob_message(error)
                ))
                .into());
            }
            let signature = signature
                .ok_or_else(|| GraphicsError::ResourceCreationFailure("Root signature serialization produced no blob".to_string()))?;

            let root_signature: ID3D12RootSignature = self
                .device
                .CreateRootSignature(0, blob_bytes(&signature))
                .map_err(graphics(GraphicsError::ResourceCreationFailure, "Failed to create root signature"))?;

            let id = RootSignatureId(self.root_signatures.len() as u64);
            self.root_signatures.push(root_signature);
            Ok(id)
        }
    }

    fn create_pipeline_state(&mut self, desc: &PipelineStateDesc) -> Result<PipelineStateId> {
        let root_signature = self.root_signature(desc.root_signature)?;

        let semantics = desc
            .input_layout
            .iter()
            .map(|e| CString::new(e.semantic))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| GraphicsError::ResourceCreationFailure(format!("Invalid semantic name: {}", e)))?;
        let input_elements: Vec<D3D12_INPUT_ELEMENT_DESC> = desc
            .input_layout
            .iter()
            .zip(&semantics)
            .map(|(element, semantic)| D3D12_INPUT_ELEMENT_DESC {
                SemanticName: PCSTR(semantic.as_ptr() as *const u8),
                SemanticIndex: element.semantic_index,
                Format: convert::format(element.format),
                InputSlot: element.input_slot,
                AlignedByteOffset: element.aligned_byte_offset,
                InputSlotClass: D3D12_INPUT_CLASSIFICATION_PER_VERTEX_DATA,
                InstanceDataStepRate: 0,
            })
            .collect();

        let blend = &desc.blend;
        let mut render_targets = [D3D12_RENDER_TARGET_BLEND_DESC::default(); 8];
        render_targets[0] = D3D12_RENDER_TARGET_BLEND_DESC {
            BlendEnable: blend.enabled.into(),
            LogicOpEnable: false.into(),
            SrcBlend: convert::blend(blend.src),
            DestBlend: convert::blend(blend.dst),
            BlendOp: convert::blend_op(blend.op),
            SrcBlendAlpha: convert::blend(blend.src_alpha),
            DestBlendAlpha: convert::blend(blend.dst_alpha),
            BlendOpAlpha: convert::blend_op(blend.alpha_op),
            LogicOp: D3D12_LOGIC_OP_NOOP,
            RenderTargetWriteMask: blend.write_mask,
        };

        let mut rtv_formats = [DXGI_FORMAT_UNKNOWN; 8];
        for (slot, format) in rtv_formats.iter_mut().zip(&desc.rtv_formats) {
            *slot = convert::format(*format);
        }

        let rasterizer = &desc.rasterizer;
        let depth = &desc.depth_stencil;

        let pso_desc = D3D12_GRAPHICS_PIPELINE_STATE_DESC {
            // 借用，不转移所有权
            pRootSignature: unsafe { borrow_com(root_signature) },
            VS: D3D12_SHADER_BYTECODE {
                pShaderBytecode: desc.vs.as_ptr() as *const c_void,
                BytecodeLength: desc.vs.len(),
            },
            PS: D3D12_SHADER_BYTECODE {
                pShaderBytecode: desc.ps.as_ptr() as *const c_void,
                BytecodeLength: desc.ps.len(),
            },
            BlendState: D3D12_BLEND_DESC {
                AlphaToCoverageEnable: false.into(),
                IndependentBlendEnable: false.into(),
                RenderTarget: render_targets,
            },
            SampleMask: desc.sample_mask,
            RasterizerState: D3D12_RASTERIZER_DESC {
                FillMode: convert::fill_mode(rasterizer.fill_mode),
                CullMode: convert::cull_mode(rasterizer.cull_mode),
                FrontCounterClockwise: rasterizer.front_counter_clockwise.into(),
                DepthBias: rasterizer.depth_bias,
                DepthBiasClamp: rasterizer.depth_bias_clamp,
                SlopeScaledDepthBias: rasterizer.slope_scaled_depth_bias,
                DepthClipEnable: rasterizer.depth_clip_enable.into(),
                ..Default::default()
            },
            DepthStencilState: D3D12_DEPTH_STENCIL_DESC {
                DepthEnable: depth.depth_enable.into(),
                DepthWriteMask: if depth.depth_write {
                    D3D12_DEPTH_WRITE_MASK_ALL
                } else {
                    D3D12_DEPTH_WRITE_MASK_ZERO
                },
                DepthFunc: convert::comparison(depth.depth_func),
                StencilEnable: depth.stencil_enable.into(),
                StencilReadMask: 0xFF,
                StencilWriteMask: 0xFF,
                ..Default::default()
            },
            InputLayout: D3D12_INPUT_LAYOUT_DESC {
                pInputElementDescs: input_elements.as_ptr(),
                NumElements: input_elements.len() as u32,
            },
            PrimitiveTopologyType: convert::topology_type(desc.topology),
            NumRenderTargets: desc.rtv_formats.len() as u32,
            RTVFormats: rtv_formats,
            DSVFormat: convert::format(desc.dsv_format),
            SampleDesc: DXGI_SAMPLE_DESC {
                Count: desc.sample_count,
                Quality: desc.sample_quality,
            },
            ..Default::default()
        };

        let pipeline: ID3D12PipelineState = unsafe { self.device.CreateGraphicsPipelineState(&pso_desc) }
            .map_err(graphics(GraphicsError::ResourceCreationFailure, "Failed to create pipeline state"))?;

        let id = PipelineStateId(self.pipeline_states.len() as u64);
        self.pipeline_states.push(pipeline);
        Ok(id)
    }

    fn compile_shader(&mut self, source: &str, entry: &str, target: &str) -> Result<Vec<u8>> {
        let entry_c = CString::new(entry)
            .map_err(|e| GraphicsError::ShaderCompilation(format!("Invalid entry point: {}", e)))?;
        let target_c = CString::new(target)
            .map_err(|e| GraphicsError::ShaderCompilation(format!("Invalid target: {}", e)))?;
        let flags = if cfg!(debug_assertions) {
            D3DCOMPILE_DEBUG | D3DCOMPILE_SKIP_OPTIMIZATION
        } else {
            0
        };

        unsafe {
            let mut code: Option<ID3DBlob> = None;
            let mut error: Option<ID3DBlob> = None;
            let result = D3DCompile(
                source.as_ptr() as *const c_void,
                source.len(),
                None,
                None,
                None,
                PCSTR(entry_c.as_ptr() as *const u8),
                PCSTR(target_c.as_ptr() as *const u8),
                flags,
                0,
                &mut code,
                Some(&mut error),
            );
            if let Err(e) = result {
                return Err(GraphicsError::ShaderCompilation(format!("{} ({}): {} {}", entry, target, e, blob_message(error))).into());
            }
            let code = code.ok_or_else(|| GraphicsError::ShaderCompilation(format!("{} produced no bytecode", entry)))?;
            Ok(blob_bytes(&code).to_vec())
        }
    }

    fn execute(&mut self, commands: &[Command]) -> Result<()> {
        unsafe {
            self.allocator
                .Reset()
                .map_err(graphics(GraphicsError::CommandExecution, "Failed to reset command allocator"))?;
            self.list
                .Reset(&self.allocator, None)
                .map_err(graphics(GraphicsError::CommandExecution, "Failed to reset command list"))?;

            let recorded = commands.iter().try_for_each(|command| self.record(command));
            self.list
                .Close()
                .map_err(graphics(GraphicsError::CommandExecution, "Failed to close command list"))?;
            recorded?;

            let lists = [Some(self.list.cast::<ID3D12CommandList>().map_err(graphics(
                GraphicsError::CommandExecution,
                "Failed to cast command list",
            ))?)];
            self.queue.ExecuteCommandLists(&lists);
        }
        Ok(())
    }

    fn signal(&mut self, value: u64) -> Result<()> {
        unsafe { self.queue.Signal(&self.fence, value) }
            .map_err(graphics(GraphicsError::CommandExecution, "Failed to signal fence"))
    }

    fn completed_fence_value(&self) -> u64 {
        unsafe { self.fence.GetCompletedValue() }
    }

    fn wait_for_fence(&mut self, value: u64) -> Result<()> {
        unsafe {
            if self.fence.GetCompletedValue() < value {
                self.fence
                    .SetEventOnCompletion(value, self.fence_event)
                    .map_err(graphics(GraphicsError::CommandExecution, "Failed to set fence event"))?;
                WaitForSingleObject(self.fence_event, INFINITE);
            }
        }
        Ok(())
    }

    fn create_swap_chain(&mut self, desc: &SwapChainDesc) -> Result<Vec<NativeResource>> {
        let swap_chain_desc = DXGI_SWAP_CHAIN_DESC1 {
            Width: desc.width,
            Height: desc.height,
            Format: convert::format(desc.format),
            SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
            BufferUsage: DXGI_USAGE_RENDER_TARGET_OUTPUT,
            BufferCount: desc.buffer_count,
            SwapEffect: DXGI_SWAP_EFFECT_FLIP_DISCARD,
            ..Default::default()
        };

        let swap_chain: IDXGISwapChain3 = unsafe {
            let swap_chain: IDXGISwapChain1 = self
                .factory
                .CreateSwapChainForHwnd(&self.queue, self.hwnd, &swap_chain_desc, None, None)
                .map_err(graphics(GraphicsError::SwapchainError, "Failed to create swap chain"))?;
            swap_chain
                .cast()
                .map_err(graphics(GraphicsError::SwapchainError, "Failed to cast swap chain to IDXGISwapChain3"))?
        };

        self.swap_chain = Some(swap_chain);
        self.swap_chain_desc = Some(*desc);
        info!(width = desc.width, height = desc.height, buffers = desc.buffer_count, "DXGI swap chain created");
        self.wrap_back_buffers(desc.buffer_count, desc.width, desc.height)
    }

    fn resize_swap_chain(&mut self, width: u32, height: u32) -> Result<Vec<NativeResource>> {
        let mut desc = self
            .swap_chain_desc
            .ok_or_else(|| GraphicsError::SwapchainError("Resize before swap chain creation".to_string()))?;
        if let Some(id) = self.back_buffers.iter().find(|id| self.resources.contains_key(*id)) {
            return Err(GraphicsError::SwapchainError(format!("Back buffer {:?} still referenced during resize", id)).into());
        }

        unsafe {
            self.swap_chain()?
                .ResizeBuffers(
                    desc.buffer_count,
                    width,
                    height,
                    convert::format(desc.format),
                    DXGI_SWAP_CHAIN_FLAG(0),
                )
                .map_err(graphics(GraphicsError::SwapchainError, "Failed to resize swap chain buffers"))?;
        }

        desc.width = width;
        desc.height = height;
        self.swap_chain_desc = Some(desc);
        self.wrap_back_buffers(desc.buffer_count, width, height)
    }

    fn present(&mut self, sync_interval: u32) -> Result<()> {
        unsafe { self.swap_chain()?.Present(sync_interval, DXGI_PRESENT(0)) }
            .ok()
            .map_err(graphics(GraphicsError::SwapchainError, "Present failed"))
    }

    fn current_back_buffer_index(&self) -> usize {
        self.swap_chain
            .as_ref()
            .map(|s| unsafe { s.GetCurrentBackBufferIndex() } as usize)
            .unwrap_or(0)
    }

    fn release(&mut self, resource: ResourceId) {
        self.resources.remove(&resource);
    }
}

impl Drop for Dx12Device {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = CloseHandle(self.fence_event) {
                warn!("Failed to close fence event: {}", e);
            }
        }
    }
}
