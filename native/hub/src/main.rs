fn main() -> anyhow::Result<()> {
    sysproxy_hub::cli()
}
