fn main() -> anyhow::Result<()> {
    detail_crm_lib::run()
}
