/// Build script for dx12_engine
///
/// # Shader Strategy:
/// - HLSL sources under `shaders/` are embedded with `include_str!` and
///   compiled at runtime by the device (D3DCompile on the DX12 backend).
fn main() {
    // Trigger rebuild if shader files change
    println!("cargo:rerun-if-changed=shaders/basic.hlsl");
    println!("cargo:rerun-if-changed=shaders/pbr.hlsl");
    println!("cargo:rerun-if-changed=shaders/skybox.hlsl");
}
